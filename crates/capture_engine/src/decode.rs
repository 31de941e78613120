use std::io::Read;
use std::sync::LazyLock;

use chardetng::EncodingDetector;
use encoding_rs::Encoding;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use regex::Regex;

use engine_logging::{engine_debug, engine_warn};

/// How far into a document a `<meta charset>` declaration is looked for.
const META_SCAN_LIMIT: usize = 2048;

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)charset\s*=\s*["']?([^"'\s>;/]+)"#).expect("static charset pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedText {
    pub text: String,
    pub encoding_label: String,
    /// Malformed sequences were replaced during decoding.
    pub had_errors: bool,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown encoding label {0:?}")]
    UnknownLabel(String),
    #[error("failed to decompress {encoding} body: {message}")]
    Decompress { encoding: String, message: String },
}

/// Decode raw bytes to text.
///
/// Strategy order: forced label -> BOM -> valid UTF-8 -> Content-Type charset ->
/// `<meta>` charset in the first 2 KiB -> chardetng. Never fails: an unknown
/// forced label falls back to detection and malformed input is replaced.
pub fn transcode(bytes: &[u8], content_type: Option<&str>, forced: Option<&str>) -> DecodedText {
    if let Some(label) = forced {
        match decode_with_label(bytes, label) {
            Ok(decoded) => return decoded,
            Err(err) => engine_warn!("{err}; falling back to detection"),
        }
    }

    if let Some((encoding, _)) = Encoding::for_bom(bytes) {
        return decode_with(bytes, encoding);
    }

    if let Ok(text) = std::str::from_utf8(bytes) {
        return DecodedText {
            text: text.to_string(),
            encoding_label: encoding_rs::UTF_8.name().to_string(),
            had_errors: false,
        };
    }

    if let Some(encoding) = content_type
        .and_then(extract_charset)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
    {
        return decode_with(bytes, encoding);
    }

    if let Some(encoding) = sniff_meta_charset(bytes) {
        return decode_with(bytes, encoding);
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);
    engine_debug!("detected encoding {}", encoding.name());
    decode_with(bytes, encoding)
}

/// Decode with an explicit label such as `gbk`, `big5` or `latin1`.
pub fn decode_with_label(bytes: &[u8], label: &str) -> Result<DecodedText, DecodeError> {
    let encoding = Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| DecodeError::UnknownLabel(label.to_string()))?;
    Ok(decode_with(bytes, encoding))
}

/// Undo transfer compression. Bodies with a gzip magic number are always
/// inflated; otherwise `Content-Encoding` decides. Unsupported encodings leave
/// the body untouched.
pub fn decompress_body(body: Vec<u8>, content_encoding: Option<&str>) -> Result<Vec<u8>, DecodeError> {
    if body.starts_with(&[0x1f, 0x8b]) {
        return inflate(GzDecoder::new(body.as_slice()), "gzip");
    }

    let encoding = content_encoding
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if encoding.is_empty() || encoding == "identity" {
        return Ok(body);
    }

    if encoding.contains("gzip") {
        return Ok(inflate(GzDecoder::new(body.as_slice()), "gzip").unwrap_or(body));
    }
    if encoding.contains("deflate") {
        if let Ok(inflated) = inflate(ZlibDecoder::new(body.as_slice()), "deflate") {
            return Ok(inflated);
        }
        return Ok(inflate(DeflateDecoder::new(body.as_slice()), "deflate").unwrap_or(body));
    }

    engine_warn!("unsupported content encoding {encoding:?}, keeping body as is");
    Ok(body)
}

fn inflate(mut reader: impl Read, encoding: &str) -> Result<Vec<u8>, DecodeError> {
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|err| DecodeError::Decompress {
            encoding: encoding.to_string(),
            message: err.to_string(),
        })?;
    Ok(out)
}

fn extract_charset(content_type: &str) -> Option<String> {
    content_type.split(';').find_map(|part| {
        let (key, value) = part.split_once('=')?;
        key.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(['"', '\'']).to_string())
            .filter(|v| !v.is_empty())
    })
}

fn sniff_meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(META_SCAN_LIMIT)];
    let head = String::from_utf8_lossy(head);
    let label = META_CHARSET.captures(&head)?.get(1)?.as_str();
    Encoding::for_label(label.as_bytes())
}

fn decode_with(bytes: &[u8], encoding: &'static Encoding) -> DecodedText {
    let (text, used, had_errors) = encoding.decode(bytes);
    if had_errors {
        engine_warn!("malformed {} input replaced while decoding", used.name());
    }
    DecodedText {
        text: text.into_owned(),
        encoding_label: used.name().to_string(),
        had_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::{extract_charset, sniff_meta_charset};

    #[test]
    fn charset_parameter_is_case_insensitive() {
        assert_eq!(
            extract_charset("text/html; Charset=\"GBK\""),
            Some("GBK".to_string())
        );
        assert_eq!(extract_charset("text/html"), None);
    }

    #[test]
    fn meta_charset_is_found_in_the_head() {
        let html = b"<html><head><meta charset='shift_jis'></head></html>";
        assert_eq!(sniff_meta_charset(html).map(|e| e.name()), Some("Shift_JIS"));
    }

    #[test]
    fn http_equiv_charset_is_found() {
        let html = br#"<meta http-equiv="Content-Type" content="text/html; charset=big5">"#;
        assert_eq!(sniff_meta_charset(html).map(|e| e.name()), Some("Big5"));
    }
}
