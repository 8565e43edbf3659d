// src/source/json_frame.rs
//
// Annotation-style JSON frames: an array of objects
//   { "obj_type": "Car", "psr": { "position": {x,y,z}, "rotation": {x,y,z}, "scale": {x,y,z} } }
// Only the yaw (rotation.z) is used.

use crate::error::ParseError;
use crate::types::{Detection, Vec3};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct JsonObject {
    #[serde(default)]
    obj_type: Option<String>,
    psr: Option<Psr>,
}

#[derive(Debug, Deserialize)]
struct Psr {
    position: Option<Xyz>,
    #[serde(default)]
    rotation: Xyz,
    #[serde(default = "unit_scale")]
    scale: Xyz,
}

#[derive(Debug, Default, Deserialize)]
struct Xyz {
    #[serde(default)]
    x: f64,
    #[serde(default)]
    y: f64,
    #[serde(default)]
    z: f64,
}

fn unit_scale() -> Xyz {
    Xyz {
        x: 1.0,
        y: 1.0,
        z: 1.0,
    }
}

impl From<Xyz> for Vec3 {
    fn from(v: Xyz) -> Self {
        Vec3::new(v.x, v.y, v.z)
    }
}

/// Parses one frame, dropping objects whose class is in `excluded`.
/// A document that is not a JSON array fails the whole frame; a single bad
/// entry only fails itself.
pub fn parse_json_frame(
    text: &str,
    frame_index: u64,
    excluded: &[String],
) -> Result<(Vec<Detection>, Vec<ParseError>), ParseError> {
    let entries: Vec<serde_json::Value> =
        serde_json::from_str(text).map_err(|e| ParseError::Json(e.to_string()))?;

    let mut detections = Vec::new();
    let mut errors = Vec::new();

    for entry in entries {
        let object: JsonObject = match serde_json::from_value(entry) {
            Ok(o) => o,
            Err(e) => {
                errors.push(ParseError::Json(e.to_string()));
                continue;
            }
        };

        if let Some(class) = &object.obj_type {
            if excluded.iter().any(|c| c == class) {
                continue;
            }
        }

        let Some(psr) = object.psr else { continue };
        let Some(position) = psr.position else { continue };

        let mut detection = Detection::new(
            position.into(),
            psr.rotation.z,
            psr.scale.into(),
            frame_index,
        );
        detection.class = object.obj_type;
        detections.push(detection);
    }

    Ok((detections, errors))
}
