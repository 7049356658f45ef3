//! Layer enumeration from an image manifest.

use serde_json::Value;

/// One entry of a manifest's `layers` array.
///
/// Fields the registry left out, or sent with the wrong JSON type, are
/// `None` (or `0` for `size`). Size is advisory and never checked here.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LayerDescriptor {
    /// Layer media type.
    pub media_type: Option<String>,
    /// Content digest (`sha256:...`), needed to fetch the blob.
    pub digest: Option<String>,
    /// Declared size in bytes.
    pub size: u64,
}

impl LayerDescriptor {
    fn from_json(item: &Value) -> Self {
        Self {
            media_type: string_field(item, "mediaType"),
            digest: string_field(item, "digest"),
            size: item.get("size").map_or(0, size_value),
        }
    }
}

/// Parse the `layers` array of a manifest, preserving order.
///
/// Malformed JSON or a missing `layers` array yields an empty vector; the
/// caller decides whether that is fatal.
#[must_use]
pub fn parse_layers(manifest: &[u8]) -> Vec<LayerDescriptor> {
    let Ok(document) = serde_json::from_slice::<Value>(manifest) else {
        return Vec::new();
    };

    document
        .get("layers")
        .and_then(Value::as_array)
        .map(|layers| layers.iter().map(LayerDescriptor::from_json).collect())
        .unwrap_or_default()
}

fn string_field(item: &Value, key: &str) -> Option<String> {
    item.get(key)?.as_str().map(str::to_owned)
}

// JSON numbers may arrive as floats; truncate toward zero, clamp negatives.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn size_value(value: &Value) -> u64 {
    value.as_u64().unwrap_or_else(|| match value.as_f64() {
        Some(n) if n.is_finite() && n > 0.0 => n as u64,
        _ => 0,
    })
}
