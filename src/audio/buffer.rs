//! Chunked in-memory audio storage
//!
//! [`ChunkedAudioBuffer`] is the plain data structure. [`SharedBuffer`] wraps
//! it in a mutex so the capture loop can write while the controller reads;
//! every chunk access happens inside one short critical section, so a reader
//! never observes a half written chunk.

use super::sample::Sample;
use crate::error::{Error, Result};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Ordered sequence of fixed-capacity sample chunks.
///
/// Index is chronological position. All chunks except possibly the last share
/// the same length.
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkedAudioBuffer<S> {
    chunks: Vec<Vec<S>>,
    chunk_samples: usize,
}

impl<S: Sample> ChunkedAudioBuffer<S> {
    /// Create an empty buffer whose full chunks hold `chunk_samples` samples.
    pub fn new(chunk_samples: usize) -> Self {
        Self {
            chunks: Vec::new(),
            chunk_samples,
        }
    }

    /// Build a buffer from existing chunks.
    pub fn from_chunks(chunk_samples: usize, chunks: Vec<Vec<S>>) -> Self {
        Self {
            chunks,
            chunk_samples,
        }
    }

    /// Overwrite the chunk at `index`, or append when `index == len()`.
    pub fn write_at(&mut self, index: usize, chunk: Vec<S>) -> Result<()> {
        let len = self.chunks.len();
        if index < len {
            self.chunks[index] = chunk;
        } else if index == len {
            self.chunks.push(chunk);
        } else {
            return Err(Error::IndexOutOfRange { index, len });
        }
        Ok(())
    }

    pub fn get(&self, index: usize) -> Result<&[S]> {
        self.chunks
            .get(index)
            .map(Vec::as_slice)
            .ok_or(Error::IndexOutOfRange {
                index,
                len: self.chunks.len(),
            })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Capacity of a full chunk.
    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    pub fn iter(&self) -> impl Iterator<Item = &[S]> {
        self.chunks.iter().map(Vec::as_slice)
    }

    /// Whole seconds of audio held, given the device sample rate.
    pub fn duration_secs(&self, sample_rate: u32) -> u64 {
        if sample_rate == 0 {
            return 0;
        }
        (self.chunk_samples as u64 * self.chunks.len() as u64) / sample_rate as u64
    }
}

/// Thread-safe handle to a [`ChunkedAudioBuffer`].
#[derive(Clone)]
pub struct SharedBuffer<S> {
    inner: Arc<Mutex<ChunkedAudioBuffer<S>>>,
}

impl<S: Sample> SharedBuffer<S> {
    pub fn new(chunk_samples: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ChunkedAudioBuffer::new(chunk_samples))),
        }
    }

    /// Lock the buffer. A poisoned lock is recovered: chunk writes are
    /// single assignments, so the data is consistent even if a writer panicked.
    pub fn lock(&self) -> MutexGuard<'_, ChunkedAudioBuffer<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write_at(&self, index: usize, chunk: Vec<S>) -> Result<()> {
        self.lock().write_at(index, chunk)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn chunk_samples(&self) -> usize {
        self.lock().chunk_samples()
    }

    /// Copy of the chunk at `index`.
    pub fn chunk(&self, index: usize) -> Result<Vec<S>> {
        self.lock().get(index).map(<[S]>::to_vec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_of(chunks: &[f32]) -> ChunkedAudioBuffer<f32> {
        ChunkedAudioBuffer::from_chunks(2, chunks.iter().map(|&v| vec![v, v]).collect())
    }

    #[test]
    fn test_write_at_len_appends() {
        let mut buffer = ChunkedAudioBuffer::new(2);
        buffer.write_at(0, vec![1.0f32, 1.0]).unwrap();
        buffer.write_at(1, vec![2.0, 2.0]).unwrap();
        assert_eq!(buffer.len(), 2);
        assert_eq!(buffer.get(1).unwrap(), &[2.0, 2.0]);
    }

    #[test]
    fn test_write_inside_overwrites_without_growing() {
        let mut buffer = buffer_of(&[1.0, 2.0, 3.0]);
        buffer.write_at(1, vec![9.0, 9.0]).unwrap();
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.get(0).unwrap(), &[1.0, 1.0]);
        assert_eq!(buffer.get(1).unwrap(), &[9.0, 9.0]);
        assert_eq!(buffer.get(2).unwrap(), &[3.0, 3.0]);
    }

    #[test]
    fn test_write_past_end_is_rejected() {
        let mut buffer = buffer_of(&[1.0]);
        let err = buffer.write_at(3, vec![0.0, 0.0]).unwrap_err();
        assert!(matches!(err, Error::IndexOutOfRange { index: 3, len: 1 }));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_get_out_of_range() {
        let buffer = buffer_of(&[1.0, 2.0]);
        assert!(matches!(
            buffer.get(2),
            Err(Error::IndexOutOfRange { index: 2, len: 2 })
        ));
    }

    #[test]
    fn test_duration_is_floored_to_whole_seconds() {
        let short = ChunkedAudioBuffer::from_chunks(1000, vec![vec![0.0f32; 1000]; 3]);
        assert_eq!(short.duration_secs(44100), 0);

        let long = ChunkedAudioBuffer::from_chunks(44100, vec![vec![0.0f32; 44100]; 3]);
        assert_eq!(long.duration_secs(44100), 3);
    }

    #[test]
    fn test_shared_buffer_copies_chunks() {
        let shared = SharedBuffer::<i16>::new(2);
        shared.write_at(0, vec![1, 2]).unwrap();
        let mut copy = shared.chunk(0).unwrap();
        copy[0] = 42;
        assert_eq!(shared.chunk(0).unwrap(), vec![1, 2]);
        assert_eq!(shared.len(), 1);
    }
}
