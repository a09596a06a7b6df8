use flate2::Compression;
use flate2::write::DeflateEncoder;
use std::io::{self, Write};

/// Raw DEFLATE writer pinned to the highest compression level.
///
/// Every DEFLATE entry the archive writer produces goes through this filter;
/// there is no way to pick a lower level.
pub struct MaxCompressionWriter {
    inner: DeflateEncoder<Vec<u8>>,
}

impl MaxCompressionWriter {
    pub fn new() -> Self {
        Self {
            inner: DeflateEncoder::new(Vec::new(), Self::level()),
        }
    }

    pub fn level() -> Compression {
        Compression::best()
    }

    /// Compress `data` and drain whatever output the encoder emitted.
    pub fn compress_chunk(&mut self, data: &[u8]) -> io::Result<Vec<u8>> {
        self.inner.write_all(data)?;
        Ok(std::mem::take(self.inner.get_mut()))
    }

    /// Flush the final block and return the remaining output.
    pub fn finish(self) -> io::Result<Vec<u8>> {
        self.inner.finish()
    }
}

impl Default for MaxCompressionWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::DeflateDecoder;
    use std::io::Read;

    #[test]
    fn uses_best_level() {
        assert_eq!(MaxCompressionWriter::level().level(), 9);
    }

    #[test]
    fn chunked_output_inflates_back() {
        let text = b"the quick brown fox jumps over the lazy dog. ".repeat(200);
        let mut writer = MaxCompressionWriter::new();

        let mut compressed = Vec::new();
        for chunk in text.chunks(97) {
            compressed.extend(writer.compress_chunk(chunk).unwrap());
        }
        compressed.extend(writer.finish().unwrap());
        assert!(compressed.len() < text.len() / 10);

        let mut restored = Vec::new();
        DeflateDecoder::new(compressed.as_slice())
            .read_to_end(&mut restored)
            .unwrap();
        assert_eq!(restored, text);
    }
}
