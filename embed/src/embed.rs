use serde::{Deserialize, Serialize};

use crate::error::EmbedError;

/// Bounding box of a logo crop, in image-relative coordinates with the
/// upper-left corner as (0, 0).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub y_min: f32,
    pub x_min: f32,
    pub y_max: f32,
    pub x_max: f32,
}

impl BoundingBox {
    /// Validate that all coordinates are within [0, 1] and min <= max on
    /// both axes.
    pub fn validate(&self) -> Result<(), EmbedError> {
        let coords = [self.y_min, self.x_min, self.y_max, self.x_max];
        if coords.iter().any(|c| !(0.0..=1.0).contains(c)) {
            return Err(EmbedError::InvalidBoundingBox(format!(
                "coordinates out of [0, 1]: {coords:?}"
            )));
        }
        if self.y_min > self.y_max || self.x_min > self.x_max {
            return Err(EmbedError::InvalidBoundingBox(format!(
                "min exceeds max: {coords:?}"
            )));
        }
        Ok(())
    }
}

/// LogoEmbedder converts a cropped logo region of an image into a dense
/// float32 vector.
///
/// The model itself lives behind this contract (typically a remote
/// inference service); this crate never runs inference locally.
/// Implementations must be safe for concurrent use (Send + Sync).
#[async_trait::async_trait]
pub trait LogoEmbedder: Send + Sync {
    /// Return the embedding vector for the logo cropped from `image_url`
    /// by `bbox`.
    async fn embed(&self, image_url: &str, bbox: &BoundingBox) -> Result<Vec<f32>, EmbedError>;

    /// Return the dimensionality of the output vectors.
    fn dimension(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_valid() {
        let bb = BoundingBox {
            y_min: 0.1,
            x_min: 0.2,
            y_max: 0.5,
            x_max: 0.9,
        };
        assert!(bb.validate().is_ok());
    }

    #[test]
    fn test_bbox_full_image() {
        let bb = BoundingBox {
            y_min: 0.0,
            x_min: 0.0,
            y_max: 1.0,
            x_max: 1.0,
        };
        assert!(bb.validate().is_ok());
    }

    #[test]
    fn test_bbox_out_of_range() {
        let bb = BoundingBox {
            y_min: -0.1,
            x_min: 0.0,
            y_max: 0.5,
            x_max: 0.5,
        };
        assert!(bb.validate().is_err());
    }

    #[test]
    fn test_bbox_min_exceeds_max() {
        let bb = BoundingBox {
            y_min: 0.8,
            x_min: 0.0,
            y_max: 0.2,
            x_max: 0.5,
        };
        assert!(bb.validate().is_err());
    }
}
