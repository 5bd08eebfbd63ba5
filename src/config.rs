/// The only content type a selection may report.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Marker spliced into the input name to form the downloadable name.
pub const OUTPUT_SUFFIX: &str = "-min.pdf";

/// Leading bytes every PDF document starts with.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// JPEG quality used when re-encoding images (1-100).
pub const JPEG_QUALITY: u8 = 50;

/// Longest side, in pixels, an image may keep after recompression.
pub const MAX_IMAGE_DIMENSION: u32 = 1500;

/// Scheme prefix of locally resolvable object references.
pub const OBJECT_URL_PREFIX: &str = "blob:pdf-minify/";
