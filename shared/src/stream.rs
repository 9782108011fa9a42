//! Multi-packet payload streaming.
//!
//! Bodies larger than one packet are cut into chunks and reassembled on the
//! far side. A stream is opened with its total size up front so the receiver
//! can bound its buffer, then filled by data chunks in order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Body of a Stream packet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamMessage {
    Open { stream_id: i32, total_size: u64 },
    Data { stream_id: i32, bytes: Vec<u8> },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("Data for unopened stream {stream_id}")]
    UnknownStream { stream_id: i32 },

    #[error("Stream {stream_id} opened twice")]
    DuplicateStream { stream_id: i32 },

    #[error("Stream {stream_id} overflowed its declared size of {declared} bytes")]
    Overflow { stream_id: i32, declared: u64 },

    #[error("Stream {stream_id} declares {declared} bytes, above the {limit} byte limit")]
    TooLarge { stream_id: i32, declared: u64, limit: u64 },
}

struct PendingStream {
    total: usize,
    data: Vec<u8>,
}

/// Reassembles inbound streams. One per session.
pub struct StreamAssembler {
    streams: HashMap<i32, PendingStream>,
    /// Ceiling on a single stream's declared size.
    limit: u64,
}

impl StreamAssembler {
    pub fn new(limit: u64) -> Self {
        Self {
            streams: HashMap::new(),
            limit,
        }
    }

    /// Feed one received message. Returns the completed payload once the
    /// declared size is reached.
    pub fn handle(&mut self, message: StreamMessage) -> Result<Option<(i32, Vec<u8>)>, StreamError> {
        match message {
            StreamMessage::Open {
                stream_id,
                total_size,
            } => {
                if total_size > self.limit {
                    return Err(StreamError::TooLarge {
                        stream_id,
                        declared: total_size,
                        limit: self.limit,
                    });
                }
                if self.streams.contains_key(&stream_id) {
                    return Err(StreamError::DuplicateStream { stream_id });
                }
                if total_size == 0 {
                    return Ok(Some((stream_id, Vec::new())));
                }
                self.streams.insert(
                    stream_id,
                    PendingStream {
                        total: total_size as usize,
                        data: Vec::with_capacity(total_size as usize),
                    },
                );
                Ok(None)
            }
            StreamMessage::Data { stream_id, bytes } => {
                let pending = self
                    .streams
                    .get_mut(&stream_id)
                    .ok_or(StreamError::UnknownStream { stream_id })?;
                if pending.data.len() + bytes.len() > pending.total {
                    let declared = pending.total as u64;
                    self.streams.remove(&stream_id);
                    return Err(StreamError::Overflow {
                        stream_id,
                        declared,
                    });
                }
                pending.data.extend_from_slice(&bytes);
                if pending.data.len() == pending.total {
                    let pending = self
                        .streams
                        .remove(&stream_id)
                        .ok_or(StreamError::UnknownStream { stream_id })?;
                    return Ok(Some((stream_id, pending.data)));
                }
                Ok(None)
            }
        }
    }

    /// Drop any partial stream state, e.g. on disconnect.
    pub fn clear(&mut self) {
        self.streams.clear();
    }
}

/// Cut an outbound payload into an Open message plus data chunks of at most
/// `chunk_size` bytes.
pub fn chunk_stream(stream_id: i32, payload: &[u8], chunk_size: usize) -> Vec<StreamMessage> {
    let mut messages = vec![StreamMessage::Open {
        stream_id,
        total_size: payload.len() as u64,
    }];
    for chunk in payload.chunks(chunk_size.max(1)) {
        messages.push(StreamMessage::Data {
            stream_id,
            bytes: chunk.to_vec(),
        });
    }
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunked_payload_reassembles() {
        let payload: Vec<u8> = (0..=255u8).cycle().take(1000).collect();
        let mut assembler = StreamAssembler::new(1 << 20);
        let mut completed = None;
        for message in chunk_stream(7, &payload, 64) {
            if let Some(done) = assembler.handle(message).expect("accepted") {
                completed = Some(done);
            }
        }
        let (stream_id, data) = completed.expect("stream completed");
        assert_eq!(stream_id, 7);
        assert_eq!(data, payload);
    }

    #[test]
    fn empty_stream_completes_on_open() {
        let mut assembler = StreamAssembler::new(1 << 20);
        let done = assembler
            .handle(StreamMessage::Open {
                stream_id: 1,
                total_size: 0,
            })
            .expect("accepted");
        assert_eq!(done, Some((1, Vec::new())));
    }

    #[test]
    fn data_without_open_is_rejected() {
        let mut assembler = StreamAssembler::new(1 << 20);
        let error = assembler
            .handle(StreamMessage::Data {
                stream_id: 3,
                bytes: vec![1, 2, 3],
            })
            .expect_err("rejected");
        assert_eq!(error, StreamError::UnknownStream { stream_id: 3 });
    }

    #[test]
    fn overflow_discards_the_stream() {
        let mut assembler = StreamAssembler::new(1 << 20);
        assembler
            .handle(StreamMessage::Open {
                stream_id: 4,
                total_size: 2,
            })
            .expect("accepted");
        let error = assembler
            .handle(StreamMessage::Data {
                stream_id: 4,
                bytes: vec![0; 5],
            })
            .expect_err("rejected");
        assert!(matches!(error, StreamError::Overflow { .. }));
        // The stream is gone entirely, not left half-filled
        assert!(matches!(
            assembler.handle(StreamMessage::Data {
                stream_id: 4,
                bytes: vec![0],
            }),
            Err(StreamError::UnknownStream { .. })
        ));
    }

    #[test]
    fn oversized_declaration_is_rejected() {
        let mut assembler = StreamAssembler::new(16);
        let error = assembler
            .handle(StreamMessage::Open {
                stream_id: 5,
                total_size: 17,
            })
            .expect_err("rejected");
        assert!(matches!(error, StreamError::TooLarge { .. }));
    }
}
