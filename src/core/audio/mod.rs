//! Telephony audio helpers: mu-law conversion, model PCM16 downsampling,
//! pre-rendered assets and per-call recording.

pub mod assets;
pub mod g711;
pub mod recorder;
pub mod resample;

pub use assets::{AudioAsset, AudioAssetError, ConsentAssets};
pub use g711::{FRAME_BYTES, FRAME_DURATION_MS, TELEPHONY_SAMPLE_RATE};
pub use recorder::{CallRecorder, RecordingError, RecordingFormat, RecordingSettings};
pub use resample::Pcm16Downsampler;
