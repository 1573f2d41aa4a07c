// Serde proxies for the glam types that appear in serialized state.
//
// Used through `#[serde(with = "crate::serde_glam::vec3")]` so that glam can
// be pulled in without its own serde feature and the JSON shape stays a plain
// `{x, y, z}` / `{x, y, z, w}` object.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize)]
struct Vec3Def {
    x: f32,
    y: f32,
    z: f32,
}

#[derive(Serialize, Deserialize)]
struct QuatDef {
    x: f32,
    y: f32,
    z: f32,
    w: f32,
}

pub mod vec3 {
    use super::Vec3Def;
    use glam::Vec3;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(v: &Vec3, s: S) -> Result<S::Ok, S::Error> {
        Vec3Def {
            x: v.x,
            y: v.y,
            z: v.z,
        }
        .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec3, D::Error> {
        Vec3Def::deserialize(d).map(|v| Vec3::new(v.x, v.y, v.z))
    }
}

pub mod quat {
    use super::QuatDef;
    use glam::Quat;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(q: &Quat, s: S) -> Result<S::Ok, S::Error> {
        QuatDef {
            x: q.x,
            y: q.y,
            z: q.z,
            w: q.w,
        }
        .serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Quat, D::Error> {
        QuatDef::deserialize(d).map(|q| Quat::from_xyzw(q.x, q.y, q.z, q.w))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec3};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Holder {
        #[serde(with = "vec3")]
        v: Vec3,
        #[serde(with = "quat")]
        q: Quat,
    }

    #[test]
    fn json_shape_is_plain_fields() {
        let h = Holder {
            v: Vec3::new(1.0, 2.0, 3.0),
            q: Quat::IDENTITY,
        };
        let json = serde_json::to_value(&h).unwrap();
        assert_eq!(json["v"]["z"], 3.0);
        assert_eq!(json["q"]["w"], 1.0);
        let back: Holder = serde_json::from_value(json).unwrap();
        assert_eq!(back, h);
    }
}
