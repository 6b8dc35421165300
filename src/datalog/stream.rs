//! Reassembles fixed-size entries from arbitrarily chunked bytes.

use std::{collections::VecDeque, convert::Infallible, io, marker::PhantomData, pin::Pin};

use bytes::Bytes;
use futures_util::{Stream, StreamExt, stream};
use serde::Serialize;
use tracing::{debug, warn};

/// A fixed-size entry type that can be decoded from exactly one entry's bytes.
pub trait Entry: Sized {
    fn entry_length() -> usize;
    fn decode(buf: &[u8]) -> Self;
}

/// Decoder state carried between chunks: one entry's worth of scratch space
/// and how much of it is filled.
#[derive(Debug, Clone)]
pub struct RecordStream<T> {
    scratch: Vec<u8>,
    /// bytes of the current entry already in `scratch`, always `< scratch.len()`
    cursor: usize,
    _entry: PhantomData<fn() -> T>,
}

impl<T: Entry> RecordStream<T> {
    /// Panics if `T` has a zero entry length.
    pub fn new() -> Self {
        assert!(T::entry_length() > 0, "entries must be at least one byte");
        Self {
            scratch: vec![0; T::entry_length()],
            cursor: 0,
            _entry: PhantomData,
        }
    }

    pub fn entry_length(&self) -> usize {
        self.scratch.len()
    }

    /// Bytes of an entry still waiting on the next chunk.
    pub fn pending(&self) -> &[u8] {
        &self.scratch[..self.cursor]
    }

    /// Feeds one chunk, yielding every entry it completes in order.
    ///
    /// Bytes are only consumed as the iterator is advanced. Dropping it early
    /// discards the rest of the chunk.
    pub fn feed<'a>(&'a mut self, chunk: &'a [u8]) -> Entries<'a, T> {
        Entries {
            stream: self,
            chunk,
        }
    }
}

impl<T: Entry> Default for RecordStream<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Entries<'a, T> {
    stream: &'a mut RecordStream<T>,
    chunk: &'a [u8],
}

impl<T: Entry> Iterator for Entries<'_, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        let stream = &mut *self.stream;
        let entry_length = stream.scratch.len();

        while !self.chunk.is_empty() {
            let take = (entry_length - stream.cursor).min(self.chunk.len());
            let (head, rest) = self.chunk.split_at(take);
            stream.scratch[stream.cursor..stream.cursor + take].copy_from_slice(head);
            self.chunk = rest;
            stream.cursor += take;

            if stream.cursor == entry_length {
                stream.cursor = 0;
                return Some(T::decode(&stream.scratch));
            }
        }

        None
    }
}

struct Decode<T> {
    source: Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>,
    decoder: RecordStream<T>,
    ready: VecDeque<T>,
    done: bool,
}

/// Decodes entries out of a chunked byte source, in source order.
///
/// A source error is yielded once and ends the stream. A partial entry left
/// when the source ends is dropped.
pub fn records<T, S>(source: S) -> impl Stream<Item = io::Result<T>> + Send
where
    T: Entry + Send + 'static,
    S: Stream<Item = io::Result<Bytes>> + Send + 'static,
{
    let state = Decode {
        source: Box::pin(source),
        decoder: RecordStream::<T>::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(entry) = state.ready.pop_front() {
                return Some((Ok(entry), state));
            }
            if state.done {
                return None;
            }

            match state.source.next().await {
                Some(Ok(chunk)) => {
                    let Decode { decoder, ready, .. } = &mut state;
                    ready.extend(decoder.feed(&chunk));
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e), state));
                }
                None => {
                    let pending = state.decoder.pending();
                    if !pending.is_empty() {
                        debug!(
                            "dropping trailing partial entry ({}/{} bytes)",
                            pending.len(),
                            state.decoder.entry_length()
                        );
                    }
                    return None;
                }
            }
        }
    })
}

#[derive(Clone, Copy)]
enum Framing {
    Open,
    First,
    Rest,
    Closed,
}

/// Renders entries as the text of one JSON array, frame by frame.
///
/// The array is always closed: on clean end and on the first source error,
/// keeping whatever was emitted before it.
pub fn json_array<T, S>(entries: S) -> impl Stream<Item = Result<String, Infallible>> + Send
where
    T: Serialize + Send + 'static,
    S: Stream<Item = io::Result<T>> + Send + 'static,
{
    let entries: Pin<Box<dyn Stream<Item = io::Result<T>> + Send>> = Box::pin(entries);

    stream::unfold((entries, Framing::Open), |(mut entries, framing)| async move {
        let frame = match framing {
            Framing::Open => return Some(("[".to_string(), (entries, Framing::First))),
            Framing::Closed => return None,
            Framing::First | Framing::Rest => match entries.next().await {
                Some(Ok(entry)) => serde_json::to_string(&entry).map_err(|e| e.to_string()),
                Some(Err(e)) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("no entries: {e}");
                    return Some(("]".to_string(), (entries, Framing::Closed)));
                }
                Some(Err(e)) => Err(e.to_string()),
                None => return Some(("]".to_string(), (entries, Framing::Closed))),
            },
        };

        match frame {
            Ok(json) if matches!(framing, Framing::Rest) => {
                Some((format!(",{json}"), (entries, Framing::Rest)))
            }
            Ok(json) => Some((json, (entries, Framing::Rest))),
            Err(e) => {
                warn!("closing array early: {e}");
                Some(("]".to_string(), (entries, Framing::Closed)))
            }
        }
    })
    .map(Ok)
}
