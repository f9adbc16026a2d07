use std::time::Duration;

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Down-mix to a single channel after loading
    pub convert_to_mono: bool,
    /// Maximum duration to load (None = load entire file)
    pub max_duration: Option<Duration>,
    /// Which source channel to keep for mono conversion (None = average all channels)
    pub mono_channel: Option<usize>,
}

impl LoadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn convert_to_mono(mut self, convert: bool) -> Self {
        self.convert_to_mono = convert;
        self
    }

    pub fn max_duration(mut self, duration: Duration) -> Self {
        self.max_duration = Some(duration);
        self
    }

    pub fn mono_channel(mut self, channel: usize) -> Self {
        self.mono_channel = Some(channel);
        self.convert_to_mono = true;
        self
    }
}
