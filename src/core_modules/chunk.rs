// THEORY:
// The `Chunk` module represents a spatial grouping of pixels and is what gives the
// color-block criterion its coarse grain. Where the pixel criterion asks "how many
// individual pixels moved?", the color-block criterion asks "how much of the scene
// shifted color as a whole?".
//
// Key architectural principles:
// 1.  **Spatial Pooling**: A frame is tiled into square blocks. Only the block's
//     average color is compared, so a large uniform shift (lights switched off, a
//     door swinging into view) registers across the whole block even when many
//     individual pixels change by less than the per-pixel cutoff.
// 2.  **Noise Reduction**: Averaging cancels single-pixel sensor noise, so the
//     color-block ratio does not fire on speckle that the pixel ratio might.
// 3.  **Data Container**: Like `Pixel`, `Chunk` is a "dumb" container. It holds the
//     pixels that fell inside the region mask for its block and knows how to
//     summarize them. It does not compare itself to other chunks; the comparator does.

pub mod chunk {
    use crate::core_modules::pixel::pixel::Pixel;

    /// A "dumb" data container representing one block of considered pixels.
    #[derive(Debug, Clone, Default)]
    pub struct Chunk {
        /// The pixels of this block that are inside the region mask.
        pub pixels: Vec<Pixel>,
    }

    impl Chunk {
        pub fn new(pixels: Vec<Pixel>) -> Self {
            Self { pixels }
        }

        pub fn with_capacity(capacity: usize) -> Self {
            Self {
                pixels: Vec::with_capacity(capacity),
            }
        }

        pub fn push(&mut self, pixel: Pixel) {
            self.pixels.push(pixel);
        }

        /// Number of pixels pooled into this block.
        pub fn len(&self) -> usize {
            self.pixels.len()
        }

        pub fn is_empty(&self) -> bool {
            self.pixels.is_empty()
        }

        /// Calculates the average pixel value for the block.
        /// An empty block averages to the default (black, transparent) pixel.
        pub fn average_pixel(&self) -> Pixel {
            let num_pixels = self.pixels.len() as u64;
            if num_pixels == 0 {
                return Pixel::default();
            }

            let (sum_r, sum_g, sum_b, sum_a) =
                self.pixels
                    .iter()
                    .fold((0u64, 0u64, 0u64, 0u64), |(r, g, b, a), p| {
                        (
                            r + p.red as u64,
                            g + p.green as u64,
                            b + p.blue as u64,
                            a + p.alpha as u64,
                        )
                    });

            Pixel {
                red: (sum_r / num_pixels) as u8,
                green: (sum_g / num_pixels) as u8,
                blue: (sum_b / num_pixels) as u8,
                alpha: (sum_a / num_pixels) as u8,
            }
        }
    }
}
