//! Lock-free SPSC ring buffer for audio samples.
//!
//! Uses `ringbuf::HeapRb<f32>`, whose `push_slice` is wait-free and safe to
//! call from the real-time audio callback.

pub mod chunk;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Producer half — held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half — held by the dispatcher thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// 2^22 = 4 194 304 f32 samples ≈ 87 s at 48 kHz, enough headroom that a
/// slow dispatcher tick never forces the audio callback to drop frames.
pub const RING_CAPACITY: usize = 1 << 22;

pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
