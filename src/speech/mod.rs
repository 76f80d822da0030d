pub mod synthesizer;
pub mod transcription;

pub use synthesizer::Synthesizer;
pub use transcription::TranscriptionSession;
