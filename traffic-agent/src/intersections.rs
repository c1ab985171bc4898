//! Monitored intersections (static registry, loaded once at startup)

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntersectionClass {
    Major,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intersection {
    pub id: u32,
    pub name: &'static str,
    pub latitude: f64,
    pub longitude: f64,
    pub class: IntersectionClass,
}

const fn intersection(
    id: u32,
    name: &'static str,
    latitude: f64,
    longitude: f64,
    class: IntersectionClass,
) -> Intersection {
    Intersection { id, name, latitude, longitude, class }
}

/// Central Ankara junctions tracked by the agent.
pub static ANKARA_INTERSECTIONS: [Intersection; 8] = [
    intersection(1, "Kızılay Meydanı", 39.9208, 32.8541, IntersectionClass::Major),
    intersection(2, "Tandoğan Kavşağı", 39.9347, 32.8197, IntersectionClass::Major),
    intersection(3, "Kuğulu Park Kavşağı", 39.9019, 32.8597, IntersectionClass::Medium),
    intersection(4, "Tunalı Hilmi Caddesi", 39.9089, 32.8486, IntersectionClass::Medium),
    intersection(5, "Çankaya Caddesi", 39.9153, 32.8625, IntersectionClass::Medium),
    intersection(6, "Atatürk Bulvarı - Sıhhiye", 39.9294, 32.8597, IntersectionClass::Major),
    intersection(7, "GMK Bulvarı - Maltepe", 39.9256, 32.8378, IntersectionClass::Medium),
    intersection(8, "Bahçelievler Kavşağı", 39.9133, 32.8264, IntersectionClass::Medium),
];

pub fn find(id: u32) -> Option<&'static Intersection> {
    ANKARA_INTERSECTIONS.iter().find(|i| i.id == id)
}
