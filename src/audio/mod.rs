pub mod assembler;
pub mod backend;
pub mod cpal_backend;
pub mod engine;
pub mod file;
pub mod queue;
pub mod resample;
pub mod simulated;

pub use assembler::FrameAssembler;
pub use backend::{AudioBackend, AudioConfig, AudioFrame, AudioStreamConfig};
pub use cpal_backend::{list_devices, CpalBackend, DeviceList};
pub use engine::{AudioEngine, SelfTestReport};
pub use file::AudioFile;
pub use queue::{CaptureControl, CaptureQueue, CaptureSink, PlaybackQueue, PlaybackReader};
pub use resample::{resample, Resampler};
pub use simulated::{SampleSource, SimulatedBackend};
