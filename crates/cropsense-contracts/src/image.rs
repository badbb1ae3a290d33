/// Immutable once constructed; owned by one pipeline invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageAsset {
    filename: String,
    media_type: String,
    bytes: Vec<u8>,
}

impl ImageAsset {
    pub fn new(
        filename: impl Into<String>,
        media_type: impl Into<String>,
        bytes: Vec<u8>,
    ) -> Self {
        Self {
            filename: filename.into(),
            media_type: media_type.into(),
            bytes,
        }
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn byte_len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::ImageAsset;

    #[test]
    fn asset_exposes_declared_metadata() {
        let asset = ImageAsset::new("leafA.jpg", "image/jpeg", vec![0xff, 0xd8, 0xff]);
        assert_eq!(asset.filename(), "leafA.jpg");
        assert_eq!(asset.media_type(), "image/jpeg");
        assert_eq!(asset.byte_len(), 3);
        assert!(!asset.is_empty());
    }

    #[test]
    fn empty_payload_is_detectable() {
        let asset = ImageAsset::new("empty.png", "image/png", Vec::new());
        assert!(asset.is_empty());
        assert_eq!(asset.byte_len(), 0);
    }
}
