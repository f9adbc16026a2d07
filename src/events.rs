//! Event types for SonoMix

/// Notifications emitted by the mixing pass.
///
/// Events are queued without blocking from inside [`Mixer::get_pcm`](crate::Mixer::get_pcm)
/// and drained with [`Mixer::poll_events`](crate::Mixer::poll_events). When the queue is full
/// new events are dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum MixerEvent {
    /// The channel's decoder reported end-of-stream; the decoder was closed and the channel
    /// is free to be bound again.
    ChannelFinished { channel: usize },
    /// A fade reached its target. `stopped` is true when the fade also stopped playback.
    FadeCompleted { channel: usize, stopped: bool },
    /// The decoder wrapped around its loop region during the last pass.
    ChannelLooped { channel: usize, loop_offset: usize },
}

impl MixerEvent {
    pub fn channel(&self) -> usize {
        match self {
            Self::ChannelFinished { channel }
            | Self::FadeCompleted { channel, .. }
            | Self::ChannelLooped { channel, .. } => *channel,
        }
    }

    /// True when the event means the channel no longer produces sound.
    pub fn is_stop(&self) -> bool {
        matches!(
            self,
            Self::ChannelFinished { .. } | Self::FadeCompleted { stopped: true, .. }
        )
    }
}
