//! In-process stand-in for an MPI job, used by the tests: one thread per worker, connected by
//! channels. Messages are matched on `(source, tag)`; messages that arrive before anybody asks
//! for them are parked in arrival order.
use crossbeam::channel::{self, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread;

use super::{GatherGroup, GatherTarget, Incoming, NetworkError, Outgoing, Pixel, Tag, Transport};
use crate::prelude::*;
use crate::types::{Sample, Topology, WorkerId};

const BARRIER_TAG: Tag = Tag(1);
const RELEASE_TAG: Tag = Tag(2);
const ALL_GATHER_TAG: Tag = Tag(3);
const GATHER_TAG: Tag = Tag(4);

enum Packet {
    Data(Vec<u8>),
    Abort(String),
}

struct Envelope {
    source: WorkerId,
    tag: Tag,
    packet: Packet,
}

pub(crate) struct LocalEndpoint {
    my_id: WorkerId,
    topology: Topology,
    peers: Arc<[Sender<Envelope>]>,
    inbox: Receiver<Envelope>,
    pending: HashMap<(WorkerId, Tag), VecDeque<Vec<u8>>>,
    aborted: Option<NetworkError>,
}

impl LocalEndpoint {
    /// One connected endpoint per worker, indexed by worker id.
    pub(crate) fn connect(num_workers: usize) -> Vec<Self> {
        let topology = Topology::new(num_workers).unwrap();
        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..num_workers).map(|_| channel::unbounded()).unzip();
        let peers: Arc<[Sender<Envelope>]> = senders.into();

        enumerate(receivers)
            .map(|(index, inbox)| Self {
                my_id: WorkerId::new(index),
                topology,
                peers: Arc::clone(&peers),
                inbox,
                pending: default(),
                aborted: None,
            })
            .collect()
    }

    fn send(&self, dst: WorkerId, tag: Tag, payload: Vec<u8>) -> Result<(), NetworkError> {
        if let Some(e) = &self.aborted {
            return Err(e.clone());
        }

        self.peers[dst.get()]
            .send(Envelope {
                source: self.my_id,
                tag,
                packet: Packet::Data(payload),
            })
            .map_err(|_| NetworkError::Disconnected)
    }

    fn recv(&mut self, src: WorkerId, tag: Tag) -> Result<Vec<u8>, NetworkError> {
        if let Some(e) = &self.aborted {
            return Err(e.clone());
        }

        if let Some(payload) = self.pending.get_mut(&(src, tag)).and_then(|q| q.pop_front()) {
            return Ok(payload);
        }

        loop {
            let envelope = self.inbox.recv().map_err(|_| NetworkError::Disconnected)?;

            match envelope.packet {
                Packet::Data(payload) if envelope.source == src && envelope.tag == tag => {
                    return Ok(payload);
                }
                Packet::Data(payload) => {
                    self.pending
                        .entry((envelope.source, envelope.tag))
                        .or_default()
                        .push_back(payload);
                }
                Packet::Abort(reason) => {
                    let error = NetworkError::Aborted {
                        id: envelope.source,
                        reason,
                    };

                    self.aborted = Some(error.clone());
                    return Err(error);
                }
            }
        }
    }

    fn recv_samples<S: Sample>(
        &mut self,
        src: WorkerId,
        tag: Tag,
        dst: &mut [S],
    ) -> Result<(), NetworkError> {
        let bytes = self.recv(src, tag)?;
        let found = bytes.len() / S::DEPTH.size_in_bytes();

        if found != dst.len() {
            return Err(NetworkError::SizeMismatch {
                source_id: src,
                expected: dst.len(),
                found,
            });
        }

        S::decode_into(&bytes, dst);
        Ok(())
    }
}

fn encode<S: Sample>(values: &[S]) -> Vec<u8> {
    let mut bytes = vec![0; values.len() * S::DEPTH.size_in_bytes()];
    S::encode_into(values, &mut bytes);
    bytes
}

impl Transport for LocalEndpoint {
    fn my_id(&self) -> WorkerId {
        self.my_id
    }

    fn topology(&self) -> Topology {
        self.topology
    }

    fn barrier(&mut self) -> Result<(), NetworkError> {
        let root = WorkerId::COORDINATOR;

        if self.my_id == root {
            for i in 1..self.num_workers() {
                self.recv(WorkerId::new(i), BARRIER_TAG)?;
            }

            for i in 1..self.num_workers() {
                self.send(WorkerId::new(i), RELEASE_TAG, vec![])?;
            }
        } else {
            self.send(root, BARRIER_TAG, vec![])?;
            self.recv(root, RELEASE_TAG)?;
        }

        Ok(())
    }

    fn all_gather(&mut self, values: &[u64]) -> Result<Vec<u64>, NetworkError> {
        let payload = values.iter().flat_map(|v| v.to_le_bytes()).collect_vec();

        for i in 0..self.num_workers() {
            if i != self.my_id.get() {
                self.send(WorkerId::new(i), ALL_GATHER_TAG, payload.clone())?;
            }
        }

        let mut out = Vec::with_capacity(values.len() * self.num_workers());
        for i in 0..self.num_workers() {
            let bytes = if i == self.my_id.get() {
                payload.clone()
            } else {
                self.recv(WorkerId::new(i), ALL_GATHER_TAG)?
            };

            out.extend(bytes.chunks(8).map(|c| {
                let mut word = [0; 8];
                word.copy_from_slice(c);
                u64::from_le_bytes(word)
            }));
        }

        Ok(out)
    }

    fn exchange<S: Pixel>(
        &mut self,
        data: &[S],
        outgoing: &[Outgoing],
        incoming: &mut [Incoming<'_, S>],
    ) -> Result<(), NetworkError> {
        for o in outgoing {
            self.send(o.dst, o.tag, encode(&o.layout.gather(data, o.offset)))?;
        }

        for slot in incoming.iter_mut() {
            self.recv_samples(slot.src, slot.tag, slot.buffer)?;
        }

        Ok(())
    }

    fn gather_into<S: Pixel>(
        &mut self,
        group: &GatherGroup,
        data: &[S],
        target: Option<GatherTarget<'_, S>>,
    ) -> Result<(), NetworkError> {
        let me = self.my_id;

        if me != group.root {
            if group.contains(me) {
                self.send(group.root, GATHER_TAG, encode(data))?;
            }

            return Ok(());
        }

        let mut target = target.ok_or(NetworkError::MissingTarget)?;
        let mut values = vec![S::default(); target.layout.len()];

        for (&member, &displacement) in zip(&group.members, target.displacements) {
            if member == me {
                if data.len() != values.len() {
                    return Err(NetworkError::SizeMismatch {
                        source_id: me,
                        expected: values.len(),
                        found: data.len(),
                    });
                }

                values.copy_from_slice(data);
            } else {
                self.recv_samples(member, GATHER_TAG, &mut values)?;
            }

            target.layout.scatter(target.buffer, displacement, &values);
        }

        Ok(())
    }

    fn abort(&self, reason: &str) {
        for peer in self.peers.iter() {
            let _ = peer.send(Envelope {
                source: self.my_id,
                tag: Tag(0),
                packet: Packet::Abort(reason.to_string()),
            });
        }
    }
}

/// True if `error` is only the echo of another worker's abort.
pub(crate) fn is_abort(error: &Error) -> bool {
    error.chain().any(|cause| {
        matches!(
            cause.downcast_ref::<NetworkError>(),
            Some(NetworkError::Aborted { .. })
        )
    })
}

/// Runs `fun` for every worker on its own thread and returns the results in worker order. A
/// worker that fails aborts all others.
pub(crate) fn run_workers<R, F>(num_workers: usize, fun: F) -> Vec<Result<R>>
where
    F: Fn(&mut LocalEndpoint) -> Result<R> + Send + Sync + 'static,
    R: Send + 'static,
{
    let fun = Arc::new(fun);

    let handles = LocalEndpoint::connect(num_workers)
        .into_iter()
        .map(|mut endpoint| {
            let fun = Arc::clone(&fun);

            thread::Builder::new()
                .name(format!("worker-{}", endpoint.my_id().get()))
                .spawn(move || {
                    let result = fun(&mut endpoint);

                    if let Err(e) = &result {
                        if !is_abort(e) {
                            endpoint.abort(&format!("{:#}", e));
                        }
                    }

                    result
                })
                .unwrap()
        })
        .collect_vec();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::StridedLayout;

    #[test]
    fn test_unmatched_messages_are_parked() {
        let mut endpoints = LocalEndpoint::connect(3);
        let mut c = endpoints.pop().unwrap();
        let b = endpoints.pop().unwrap();
        let a = endpoints.pop().unwrap();

        a.send(c.my_id, Tag(1), vec![1]).unwrap();
        a.send(c.my_id, Tag(2), vec![2]).unwrap();
        a.send(c.my_id, Tag(1), vec![3]).unwrap();
        b.send(c.my_id, Tag(1), vec![4]).unwrap();

        assert_eq!(c.recv(b.my_id, Tag(1)).unwrap(), vec![4]);
        assert_eq!(c.recv(a.my_id, Tag(2)).unwrap(), vec![2]);
        assert_eq!(c.recv(a.my_id, Tag(1)).unwrap(), vec![1]);
        assert_eq!(c.recv(a.my_id, Tag(1)).unwrap(), vec![3]);
    }

    #[test]
    fn test_abort_is_sticky() {
        let mut endpoints = LocalEndpoint::connect(2);
        let mut b = endpoints.pop().unwrap();
        let a = endpoints.pop().unwrap();

        a.abort("out of coffee");
        match b.recv(a.my_id, Tag(5)) {
            Err(NetworkError::Aborted { id, reason }) => {
                assert_eq!(id, a.my_id);
                assert_eq!(reason, "out of coffee");
            }
            other => panic!("unexpected result: {:?}", other),
        }

        assert!(b.barrier().is_err());
    }

    #[test]
    fn test_barrier_and_all_gather() {
        let results = run_workers(5, |endpoint| {
            let me = endpoint.my_id().get() as u64;
            let mut rounds = vec![];

            for round in 0..3 {
                endpoint.barrier()?;
                rounds.push(endpoint.all_gather(&[me, round])?);
            }

            Ok(rounds)
        });

        for result in results {
            for (round, values) in enumerate(result.unwrap()) {
                let expected = (0..5).flat_map(|i| vec![i, round as u64]).collect_vec();
                assert_eq!(values, expected);
            }
        }
    }

    #[test]
    fn test_exchange_strided_region() {
        let results = run_workers(2, |endpoint| {
            // 4x3 tile, worker 0 sends its rightmost two columns
            let tile: Vec<u16> = (0..12).collect();
            let mut received = vec![0u16; 6];

            if endpoint.my_id().is_coordinator() {
                let outgoing = Outgoing {
                    dst: WorkerId::new(1),
                    tag: Tag(20),
                    offset: 2,
                    layout: StridedLayout::new(3, 2, 4),
                };
                endpoint.exchange(&tile, &[outgoing], &mut [])?;
            } else {
                let incoming = Incoming {
                    src: WorkerId::COORDINATOR,
                    tag: Tag(20),
                    buffer: &mut received,
                };
                endpoint.exchange(&tile, &[], &mut [incoming])?;
            }

            Ok(received)
        });

        assert_eq!(results[1].as_ref().unwrap(), &vec![2, 3, 6, 7, 10, 11]);
    }

    #[test]
    fn test_gather_with_non_contributing_root() {
        let results = run_workers(4, |endpoint| {
            let me = endpoint.my_id();
            let group = GatherGroup {
                root: WorkerId::COORDINATOR,
                members: vec![WorkerId::new(3), WorkerId::new(1)],
            };
            let data = vec![me.get() as u8; 2];
            let mut buffer = vec![0u8; 6];

            let target = if me.is_coordinator() {
                Some(GatherTarget {
                    buffer: &mut buffer,
                    layout: StridedLayout::new(2, 1, 3),
                    displacements: &[0, 1],
                })
            } else {
                None
            };

            endpoint.gather_into(&group, &data, target)?;
            Ok(buffer)
        });

        assert_eq!(results[0].as_ref().unwrap(), &vec![3, 1, 0, 3, 1, 0]);
    }
}
