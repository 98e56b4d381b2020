// THEORY:
// The `Pixel` module is the most fundamental unit of the comparison engine. It is a
// "dumb" data container for a single RGBA pixel plus the one pairwise measure every
// change criterion is built on: the channel delta.
//
// The channel delta is the sum of absolute differences of the red, green and blue
// channels, so it lives in 0..=765 (3 x 255). Alpha is carried but ignored; a frame
// source that toggles transparency is not a change in the scene.

pub mod pixel {
    pub type Channel = u8;
    pub type ChannelDelta = u16;

    /// Bytes per pixel in a frame buffer (RGBA).
    pub const CHANNELS: usize = 4;
    /// The largest possible channel delta between two pixels.
    pub const MAX_CHANNEL_DELTA: ChannelDelta = 3 * Channel::MAX as ChannelDelta;

    /// A "dumb" data container representing a single RGBA pixel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Pixel {
        /// The red channel value (0-255).
        pub red: Channel,
        /// The green channel value (0-255).
        pub green: Channel,
        /// The blue channel value (0-255).
        pub blue: Channel,
        /// The alpha (transparency) channel value (0-255).
        pub alpha: Channel,
    }

    impl Pixel {
        pub const fn new(red: Channel, green: Channel, blue: Channel, alpha: Channel) -> Self {
            Self {
                red,
                green,
                blue,
                alpha,
            }
        }

        /// An opaque pixel.
        pub const fn rgb(red: Channel, green: Channel, blue: Channel) -> Self {
            Self::new(red, green, blue, Channel::MAX)
        }

        /// Sum of absolute RGB channel differences, in `0..=765`.
        #[inline]
        pub fn channel_delta(&self, other: &Pixel) -> ChannelDelta {
            self.red.abs_diff(other.red) as ChannelDelta
                + self.green.abs_diff(other.green) as ChannelDelta
                + self.blue.abs_diff(other.blue) as ChannelDelta
        }

        pub fn to_bytes(self) -> [u8; CHANNELS] {
            [self.red, self.green, self.blue, self.alpha]
        }
    }

    impl From<&[u8]> for Pixel {
        /// Reads the first four bytes as RGBA. Missing bytes read as zero.
        fn from(bytes: &[u8]) -> Self {
            let channel = |i: usize| bytes.get(i).copied().unwrap_or_default();
            Pixel::new(channel(0), channel(1), channel(2), channel(3))
        }
    }
}
