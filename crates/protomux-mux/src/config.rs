use protomux_frame::FrameConfig;

const DEFAULT_BUFFER_CAPACITY: usize = 8 * 1024;

/// Session configuration.
#[derive(Debug, Clone)]
pub struct MuxConfig {
    /// Frame limits, applied to incoming frames and outgoing message payloads.
    pub frame: FrameConfig,
    /// Initial capacity of the cork buffer. Default: 8 KiB.
    pub initial_buffer_capacity: usize,
}

impl MuxConfig {
    /// Override the maximum record body size.
    pub fn with_max_payload_size(mut self, max_payload_size: usize) -> Self {
        self.frame.max_payload_size = max_payload_size;
        self
    }
}

impl Default for MuxConfig {
    fn default() -> Self {
        Self {
            frame: FrameConfig::default(),
            initial_buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }
}
