// Copyright 2025 Brian Langenberger
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Background tag extraction over channels
//!
//! Front ends hand whole files to the pool and pick up results on
//! their own schedule, keeping large buffers and parse work off the
//! UI thread.  Requests carry a caller-chosen id since responses
//! arrive in completion order, not submission order.

use crate::Error;
use crate::tag::Metadata;
use crossbeam::channel::{Receiver, Sender, unbounded};
use std::thread::JoinHandle;
use tracing::debug;

/// One file to extract tags from
#[derive(Clone, Debug)]
pub struct ParseRequest {
    /// Caller-chosen id echoed back in the response
    pub id: u64,
    /// Complete file contents
    pub bytes: Vec<u8>,
    /// File name, used for log output only
    pub file_name: String,
}

/// The outcome of one [`ParseRequest`]
#[derive(Debug)]
pub struct ParseResponse {
    /// The id of the request this answers
    pub id: u64,
    /// Extracted tags, or why extraction was refused
    pub result: Result<Metadata, Error>,
}

/// A fixed set of worker threads parsing files concurrently
///
/// Dropping the pool closes the request channel, lets the workers
/// drain what was already submitted, and joins them.
pub struct ParsePool {
    requests: Option<Sender<ParseRequest>>,
    responses: Receiver<ParseResponse>,
    workers: Vec<JoinHandle<()>>,
}

impl ParsePool {
    /// Starts a pool with the given number of workers, at least one
    pub fn new(workers: usize) -> Self {
        let (request_tx, request_rx) = unbounded::<ParseRequest>();
        let (response_tx, response_rx) = unbounded();

        let workers = (0..workers.max(1))
            .map(|index| {
                let requests = request_rx.clone();
                let responses = response_tx.clone();

                std::thread::spawn(move || {
                    debug!("parse worker {index} up");
                    for request in requests {
                        let result = crate::tag::parse(&request.bytes, &request.file_name);
                        let response = ParseResponse {
                            id: request.id,
                            result,
                        };
                        if responses.send(response).is_err() {
                            // response side hung up, nothing left to do
                            break;
                        }
                    }
                    debug!("parse worker {index} down");
                })
            })
            .collect();

        Self {
            requests: Some(request_tx),
            responses: response_rx,
            workers,
        }
    }

    /// Queues a file for extraction
    ///
    /// The request comes back as the error if the pool has already
    /// shut down.
    pub fn submit(&self, request: ParseRequest) -> Result<(), ParseRequest> {
        match &self.requests {
            Some(sender) => sender.send(request).map_err(|err| err.into_inner()),
            None => Err(request),
        }
    }

    /// The channel completed extractions arrive on
    pub fn responses(&self) -> &Receiver<ParseResponse> {
        &self.responses
    }
}

impl Drop for ParsePool {
    fn drop(&mut self) {
        // closing the request channel ends each worker's loop
        self.requests.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flac::{RawBlock, STREAMINFO, VORBIS_COMMENT, VorbisComment, fields, write_blocks};

    fn flac_named(title: &str) -> Vec<u8> {
        let mut comment = VorbisComment::default();
        comment.set(fields::TITLE, title);

        let blocks = [
            RawBlock {
                block_type: STREAMINFO,
                data: vec![0; 34],
            },
            RawBlock::build(VORBIS_COMMENT, &comment).unwrap(),
        ];

        let mut file = Vec::new();
        write_blocks(&mut file, &blocks).unwrap();
        file
    }

    #[test]
    fn responses_carry_request_ids() {
        let pool = ParsePool::new(2);
        for (id, title) in [(7, "seven"), (9, "nine")] {
            pool.submit(ParseRequest {
                id,
                bytes: flac_named(title),
                file_name: format!("{title}.flac"),
            })
            .unwrap();
        }

        let mut responses: Vec<_> = pool.responses().iter().take(2).collect();
        responses.sort_by_key(|response| response.id);

        assert_eq!(responses[0].id, 7);
        assert_eq!(
            responses[0].result.as_ref().unwrap().title.as_deref(),
            Some("seven")
        );
        assert_eq!(responses[1].id, 9);
        assert_eq!(
            responses[1].result.as_ref().unwrap().title.as_deref(),
            Some("nine")
        );
    }

    #[test]
    fn refused_containers_come_back_as_errors() {
        let pool = ParsePool::new(1);
        pool.submit(ParseRequest {
            id: 1,
            bytes: b"not audio at all".to_vec(),
            file_name: "mystery.bin".to_owned(),
        })
        .unwrap();

        let response = pool.responses().recv().unwrap();
        assert_eq!(response.id, 1);
        assert!(matches!(response.result, Err(Error::UnknownContainer)));
    }

    #[test]
    fn zero_workers_still_parses() {
        let pool = ParsePool::new(0);
        pool.submit(ParseRequest {
            id: 1,
            bytes: flac_named("lone"),
            file_name: "lone.flac".to_owned(),
        })
        .unwrap();

        let response = pool.responses().recv().unwrap();
        assert_eq!(response.result.unwrap().title.as_deref(), Some("lone"));
    }
}
