use super::backend::{CollectiveBackend, CommElem, CommError, Result, WireDtype};
use crossbeam::channel::{Receiver, Sender, unbounded};

/// One message on the ring.
///
/// `index` names the chunk (all-reduce, all-gather) or the destination rank (scatter), so a
/// receiver can check it got what the algorithm says it should.
#[derive(Debug, Clone)]
pub struct Packet {
    pub dtype: WireDtype,
    pub index: usize,
    pub payload: Vec<u8>,
}

/// A CPU collective backend for workers living in one process.
///
/// Ranks are arranged in a ring and only ever talk to their neighbours through `crossbeam`
/// channels, which mirrors the data movement NCCL performs between GPUs.
pub struct CpuBackend {
    rank: usize,
    world_size: usize,
    left_rx: Receiver<Packet>, // Receive from rank - 1
    right_tx: Sender<Packet>,  // Send to rank + 1
}

impl CpuBackend {
    pub fn new(
        rank: usize,
        world_size: usize,
        left_rx: Receiver<Packet>,
        right_tx: Sender<Packet>,
    ) -> Self {
        Self {
            rank,
            world_size,
            left_rx,
            right_tx,
        }
    }

    /// Builds a fully wired ring of `world_size` backends, indexed by rank.
    ///
    /// Channel `i` connects rank `i` to rank `i + 1`, so rank `r` sends on channel `r` and
    /// receives on channel `r - 1`.
    pub fn ring(world_size: usize) -> Vec<CpuBackend> {
        let (txs, rxs): (Vec<_>, Vec<_>) = (0..world_size).map(|_| unbounded()).unzip();
        (0..world_size)
            .map(|rank| {
                let left = (rank + world_size - 1) % world_size;
                CpuBackend::new(rank, world_size, rxs[left].clone(), txs[rank].clone())
            })
            .collect()
    }

    fn send_right<T: CommElem>(&self, index: usize, data: &[T]) -> Result<()> {
        let packet = Packet {
            dtype: WireDtype::of::<T>()?,
            index,
            payload: bytemuck::cast_slice::<T, u8>(data).to_vec(),
        };
        self.forward(packet)
    }

    fn forward(&self, packet: Packet) -> Result<()> {
        self.right_tx
            .send(packet)
            .map_err(|_| CommError::Disconnected { rank: self.rank })
    }

    fn recv_packet(&self) -> Result<Packet> {
        self.left_rx
            .recv()
            .map_err(|_| CommError::Disconnected { rank: self.rank })
    }

    fn recv_left<T: CommElem>(&self, expected_index: usize) -> Result<Vec<T>> {
        let packet = self.recv_packet()?;
        if packet.index != expected_index {
            return Err(CommError::UnexpectedPacket {
                expected: expected_index,
                got: packet.index,
            });
        }
        decode(packet)
    }

    /// `(rank - step - offset) mod world_size`, the chunk index a ring step touches.
    fn ring_index(&self, step: usize, offset: isize) -> usize {
        (self.rank as isize - step as isize - offset).rem_euclid(self.world_size as isize) as usize
    }
}

fn decode<T: CommElem>(packet: Packet) -> Result<Vec<T>> {
    let expected = WireDtype::of::<T>()?;
    if packet.dtype != expected {
        return Err(CommError::DtypeMismatch {
            expected,
            got: packet.dtype,
        });
    }
    let width = expected.byte_width();
    if packet.payload.len() % width != 0 {
        return Err(CommError::LengthMismatch {
            expected: packet.payload.len().next_multiple_of(width),
            got: packet.payload.len(),
        });
    }
    // The payload is only byte-aligned, so copy out instead of casting in place.
    Ok(bytemuck::allocation::pod_collect_to_vec::<u8, T>(&packet.payload))
}

fn chunk_bounds(index: usize, chunk_size: usize, total: usize) -> (usize, usize) {
    let start = (index * chunk_size).min(total);
    let end = (start + chunk_size).min(total);
    (start, end)
}

impl CollectiveBackend for CpuBackend {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_reduce_sum<T: CommElem>(&self, data: &mut [T]) -> Result<()> {
        let total_elements = data.len();
        let chunk_size = total_elements.div_ceil(self.world_size);

        // --- Phase 1: Scatter-Reduce ---
        // In each step, we send a chunk to the right and receive a chunk from the left.
        // We add the received chunk to our local buffer.
        for step in 0..self.world_size - 1 {
            let send_chunk_idx = self.ring_index(step, 0);
            let recv_chunk_idx = self.ring_index(step, 1);

            let (start, end) = chunk_bounds(send_chunk_idx, chunk_size, total_elements);
            self.send_right(send_chunk_idx, &data[start..end])?;

            let recv_data = self.recv_left::<T>(recv_chunk_idx)?;
            let (recv_start, recv_end) = chunk_bounds(recv_chunk_idx, chunk_size, total_elements);
            if recv_data.len() != recv_end - recv_start {
                return Err(CommError::LengthMismatch {
                    expected: recv_end - recv_start,
                    got: recv_data.len(),
                });
            }
            for (dst, &val) in data[recv_start..recv_end].iter_mut().zip(&recv_data) {
                *dst += val;
            }
        }

        // --- Phase 2: All-Gather ---
        // Now each rank has one fully reduced chunk. We need to share it with everyone.
        for step in 0..self.world_size - 1 {
            let send_chunk_idx = self.ring_index(step, -1);
            let recv_chunk_idx = self.ring_index(step, 0);

            let (start, end) = chunk_bounds(send_chunk_idx, chunk_size, total_elements);
            self.send_right(send_chunk_idx, &data[start..end])?;

            let recv_data = self.recv_left::<T>(recv_chunk_idx)?;
            let (recv_start, recv_end) = chunk_bounds(recv_chunk_idx, chunk_size, total_elements);
            if recv_data.len() != recv_end - recv_start {
                return Err(CommError::LengthMismatch {
                    expected: recv_end - recv_start,
                    got: recv_data.len(),
                });
            }
            data[recv_start..recv_end].copy_from_slice(&recv_data);
        }

        Ok(())
    }

    fn all_gather<T: CommElem>(&self, send: &[T], recv: &mut [T]) -> Result<()> {
        let n = send.len();
        if recv.len() != n * self.world_size {
            return Err(CommError::LengthMismatch {
                expected: n * self.world_size,
                got: recv.len(),
            });
        }
        recv[self.rank * n..(self.rank + 1) * n].copy_from_slice(send);

        // Each step passes along the chunk received in the previous one, so after
        // world_size - 1 steps every chunk has visited every rank.
        for step in 0..self.world_size - 1 {
            let send_chunk_idx = self.ring_index(step, 0);
            let recv_chunk_idx = self.ring_index(step, 1);

            self.send_right(
                send_chunk_idx,
                &recv[send_chunk_idx * n..(send_chunk_idx + 1) * n],
            )?;

            let recv_data = self.recv_left::<T>(recv_chunk_idx)?;
            if recv_data.len() != n {
                return Err(CommError::LengthMismatch {
                    expected: n,
                    got: recv_data.len(),
                });
            }
            recv[recv_chunk_idx * n..(recv_chunk_idx + 1) * n].copy_from_slice(&recv_data);
        }
        Ok(())
    }

    fn scatter<T: CommElem>(&self, send: &[T], recv: &mut [T], root: usize) -> Result<()> {
        if root >= self.world_size {
            return Err(CommError::InvalidRoot {
                root,
                world_size: self.world_size,
            });
        }
        let n = recv.len();

        if self.rank == root {
            if send.len() != n * self.world_size {
                return Err(CommError::LengthMismatch {
                    expected: n * self.world_size,
                    got: send.len(),
                });
            }
            // Farthest rank first: every rank forwards what it receives until the packet
            // addressed to itself arrives, which is then the last one it sees.
            for distance in (1..self.world_size).rev() {
                let target = (root + distance) % self.world_size;
                self.send_right(target, &send[target * n..(target + 1) * n])?;
            }
            recv.copy_from_slice(&send[root * n..(root + 1) * n]);
            return Ok(());
        }

        let distance = (self.rank + self.world_size - root) % self.world_size;
        for _ in 0..self.world_size - distance - 1 {
            let packet = self.recv_packet()?;
            if packet.index == self.rank {
                return Err(CommError::UnexpectedPacket {
                    expected: (self.rank + 1) % self.world_size,
                    got: packet.index,
                });
            }
            self.forward(packet)?;
        }

        let own = self.recv_left::<T>(self.rank)?;
        if own.len() != n {
            return Err(CommError::LengthMismatch {
                expected: n,
                got: own.len(),
            });
        }
        recv.copy_from_slice(&own);
        Ok(())
    }
}
