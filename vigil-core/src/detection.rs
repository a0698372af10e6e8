//! Detection data model and the cloud result payload

use crate::error::{Error, Result};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::PathBuf;

/// Box as `(ymin, xmin, ymax, xmax)`.
///
/// Raw model output is normalized to [0, 1]; `scale` maps it onto an
/// image's pixel grid.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionBox {
    pub ymin: f32,
    pub xmin: f32,
    pub ymax: f32,
    pub xmax: f32,
}

impl DetectionBox {
    pub fn new(ymin: f32, xmin: f32, ymax: f32, xmax: f32) -> Self {
        Self { ymin, xmin, ymax, xmax }
    }

    pub fn from_slice(coords: &[f32]) -> Option<Self> {
        match coords {
            [ymin, xmin, ymax, xmax] => Some(Self::new(*ymin, *xmin, *ymax, *xmax)),
            _ => None,
        }
    }

    /// `pixel = normalized * dimension`; height scales ymin/ymax, width xmin/xmax.
    pub fn scale(&self, height: f32, width: f32) -> Self {
        Self {
            ymin: self.ymin * height,
            xmin: self.xmin * width,
            ymax: self.ymax * height,
            xmax: self.xmax * width,
        }
    }

    /// Clamp to the pixel grid of a `width` x `height` image. NaN maps to 0.
    pub fn clamp_to(&self, height: u32, width: u32) -> PixelBox {
        let max_y = height.saturating_sub(1) as f32;
        let max_x = width.saturating_sub(1) as f32;
        let clamp = |v: f32, max: f32| {
            if v.is_nan() {
                0
            } else {
                v.clamp(0.0, max) as u32
            }
        };
        PixelBox {
            top: clamp(self.ymin, max_y),
            left: clamp(self.xmin, max_x),
            bottom: clamp(self.ymax, max_y),
            right: clamp(self.xmax, max_x),
        }
    }

    pub fn as_array(&self) -> [f32; 4] {
        [self.ymin, self.xmin, self.ymax, self.xmax]
    }
}

/// Integer box that lies inside the image it was clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBox {
    pub top: u32,
    pub left: u32,
    pub bottom: u32,
    pub right: u32,
}

/// One detected object, in model output order.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionResult {
    pub index: usize,
    pub class_name: String,
    pub score: f32,
    pub detections_count: i64,
}

/// Everything a successful inference produced for one captured frame.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutcome {
    pub results: Vec<DetectionResult>,
    pub annotated_path: PathBuf,
}

impl InferenceOutcome {
    pub fn payload(&self) -> ResultPayload {
        ResultPayload::from_results(&self.results)
    }
}

/// One entry of the cloud result message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireDetection {
    pub detection_classes: String,
    pub detection_scores: f64,
    pub num_detections: i64,
}

/// Cloud result message: a JSON object keyed by detection index.
///
/// Keys are emitted in index order (`"0"`, `"1"`, ... `"10"`), not in
/// lexicographic order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultPayload {
    pub entries: Vec<(usize, WireDetection)>,
}

impl ResultPayload {
    pub fn from_results(results: &[DetectionResult]) -> Self {
        let entries = results
            .iter()
            .map(|r| {
                (
                    r.index,
                    WireDetection {
                        detection_classes: r.class_name.clone(),
                        detection_scores: widen_score(r.score),
                        num_detections: r.detections_count,
                    },
                )
            })
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&WireDetection> {
        self.entries.iter().find(|(i, _)| *i == index).map(|(_, d)| d)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::Serialization(format!("Invalid result payload: {}", e)))
    }
}

/// Widen an `f32` score to the `f64` with the same shortest decimal form,
/// so `0.91f32` is sent as `0.91` rather than `0.9100000262260437`.
pub fn widen_score(score: f32) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    score.to_string().parse::<f64>().unwrap_or(score as f64)
}

impl Serialize for ResultPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (index, detection) in &self.entries {
            map.serialize_entry(&index.to_string(), detection)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ResultPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct PayloadVisitor;

        impl<'de> Visitor<'de> for PayloadVisitor {
            type Value = ResultPayload;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object keyed by detection index")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((key, value)) = access.next_entry::<String, WireDetection>()? {
                    let index = key
                        .parse::<usize>()
                        .map_err(|_| serde::de::Error::custom(format!("invalid detection index {:?}", key)))?;
                    entries.push((index, value));
                }
                entries.sort_by_key(|(index, _)| *index);
                Ok(ResultPayload { entries })
            }
        }

        deserializer.deserialize_map(PayloadVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn result(index: usize, class_name: &str, score: f32, count: i64) -> DetectionResult {
        DetectionResult {
            index,
            class_name: class_name.to_string(),
            score,
            detections_count: count,
        }
    }

    #[test]
    fn test_scale_to_pixels() {
        let b = DetectionBox::new(0.25, 0.5, 0.75, 1.0).scale(480.0, 640.0);
        assert_eq!(b.as_array(), [120.0, 320.0, 360.0, 640.0]);
    }

    #[test]
    fn test_clamp_to_bounds() {
        let b = DetectionBox::new(-10.0, -5.0, 900.0, 2000.0).clamp_to(480, 640);
        assert_eq!(b, PixelBox { top: 0, left: 0, bottom: 479, right: 639 });

        let b = DetectionBox::new(f32::NAN, 10.0, 20.0, f32::INFINITY).clamp_to(480, 640);
        assert_eq!(b, PixelBox { top: 0, left: 10, bottom: 20, right: 639 });
    }

    #[test]
    fn test_from_slice() {
        assert!(DetectionBox::from_slice(&[0.1, 0.2, 0.3]).is_none());
        assert_eq!(
            DetectionBox::from_slice(&[0.1, 0.2, 0.3, 0.4]),
            Some(DetectionBox::new(0.1, 0.2, 0.3, 0.4))
        );
    }

    #[test]
    fn test_payload_shape() {
        let payload = ResultPayload::from_results(&[
            result(0, "bicycle", 0.91, 3),
            result(1, "airplane", 0.40, 3),
        ]);
        let json: serde_json::Value = serde_json::from_slice(&payload.to_bytes().unwrap()).unwrap();
        assert_eq!(json["0"]["detection_classes"], "bicycle");
        assert_eq!(json["0"]["detection_scores"].as_f64(), Some(0.91));
        assert_eq!(json["0"]["num_detections"].as_i64(), Some(3));
        assert_eq!(json["1"]["detection_classes"], "airplane");
    }

    #[test]
    fn test_payload_keys_in_index_order() {
        let results: Vec<_> = (0..12).map(|i| result(i, "person", 0.5, 12)).collect();
        let text = String::from_utf8(ResultPayload::from_results(&results).to_bytes().unwrap()).unwrap();
        let pos2 = text.find("\"2\":").unwrap();
        let pos10 = text.find("\"10\":").unwrap();
        assert!(pos2 < pos10);
    }

    #[test]
    fn test_payload_round_trip() {
        let payload = ResultPayload::from_results(&[result(0, "traffic light", 0.7734, 1)]);
        let parsed = ResultPayload::from_bytes(&payload.to_bytes().unwrap()).unwrap();
        let entry = parsed.get(0).unwrap();
        assert_eq!(entry.detection_classes, "traffic light");
        assert!((entry.detection_scores - 0.7734).abs() < 1e-6);
        assert!(ResultPayload::from_bytes(br#"{"x": {}}"#).is_err());
    }

    #[test]
    fn test_widen_score() {
        assert_eq!(widen_score(0.91), 0.91);
        assert_eq!(widen_score(f32::NAN), 0.0);
    }

    proptest! {
        #[test]
        fn prop_identity_scale(ymin in 0.0f32..1.0, xmin in 0.0f32..1.0, ymax in 0.0f32..1.0, xmax in 0.0f32..1.0) {
            let b = DetectionBox::new(ymin, xmin, ymax, xmax);
            prop_assert_eq!(b.scale(1.0, 1.0), b);
        }

        #[test]
        fn prop_height_scaling_is_linear(
            ymin in 0.0f32..1.0, xmin in 0.0f32..1.0, ymax in 0.0f32..1.0, xmax in 0.0f32..1.0,
            h in 1.0f32..4096.0, w in 1.0f32..4096.0, k in 1.0f32..8.0,
        ) {
            let b = DetectionBox::new(ymin, xmin, ymax, xmax);
            let base = b.scale(h, w);
            let scaled = b.scale(h * k, w);
            let tol = |v: f32| 1e-3 * v.abs().max(1.0);
            prop_assert!((scaled.ymin - base.ymin * k).abs() <= tol(scaled.ymin));
            prop_assert!((scaled.ymax - base.ymax * k).abs() <= tol(scaled.ymax));
            prop_assert_eq!(scaled.xmin, base.xmin);
            prop_assert_eq!(scaled.xmax, base.xmax);
        }

        #[test]
        fn prop_clamped_box_inside_image(
            ymin in -2.0f32..2.0, xmin in -2.0f32..2.0, ymax in -2.0f32..2.0, xmax in -2.0f32..2.0,
            h in 1u32..2000, w in 1u32..2000,
        ) {
            let px = DetectionBox::new(ymin, xmin, ymax, xmax).scale(h as f32, w as f32).clamp_to(h, w);
            prop_assert!(px.top < h && px.bottom < h);
            prop_assert!(px.left < w && px.right < w);
        }
    }
}
