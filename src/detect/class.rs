use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! object_classes {
    ($($variant:ident => $label:literal),+ $(,)?) => {
        /// Detector categories, in detector output index order.
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum ObjectClass {
            $($variant),+
        }

        const ALL_CLASSES: &[ObjectClass] = &[$(ObjectClass::$variant),+];

        /// Label table indexed by `ObjectClass as usize`.
        pub const CLASS_LABELS: &[&str] = &[$($label),+];
    };
}

object_classes! {
    Person => "person",
    Bicycle => "bicycle",
    Car => "car",
    Motorcycle => "motorcycle",
    Airplane => "airplane",
    Bus => "bus",
    Train => "train",
    Truck => "truck",
    Boat => "boat",
    TrafficLight => "traffic light",
    FireHydrant => "fire hydrant",
    StopSign => "stop sign",
    ParkingMeter => "parking meter",
    Bench => "bench",
    Bird => "bird",
    Cat => "cat",
    Dog => "dog",
    Horse => "horse",
    Sheep => "sheep",
    Cow => "cow",
    Elephant => "elephant",
    Bear => "bear",
    Zebra => "zebra",
    Giraffe => "giraffe",
    Backpack => "backpack",
    Umbrella => "umbrella",
    Handbag => "handbag",
    Tie => "tie",
    Suitcase => "suitcase",
    Frisbee => "frisbee",
    Skis => "skis",
    Snowboard => "snowboard",
    SportsBall => "sports ball",
    Kite => "kite",
    BaseballBat => "baseball bat",
    BaseballGlove => "baseball glove",
    Skateboard => "skateboard",
    Surfboard => "surfboard",
    TennisRacket => "tennis racket",
    Bottle => "bottle",
    WineGlass => "wine glass",
    Cup => "cup",
    Fork => "fork",
    Knife => "knife",
    Spoon => "spoon",
    Bowl => "bowl",
    Banana => "banana",
    Apple => "apple",
    Sandwich => "sandwich",
    Orange => "orange",
    Broccoli => "broccoli",
    Carrot => "carrot",
    HotDog => "hot dog",
    Pizza => "pizza",
    Donut => "donut",
    Cake => "cake",
    Chair => "chair",
    Couch => "couch",
    PottedPlant => "potted plant",
    Bed => "bed",
    DiningTable => "dining table",
    Toilet => "toilet",
    Tv => "tv",
    Laptop => "laptop",
    Mouse => "mouse",
    Remote => "remote",
    Keyboard => "keyboard",
    CellPhone => "cell phone",
    Microwave => "microwave",
    Oven => "oven",
    Toaster => "toaster",
    Sink => "sink",
    Refrigerator => "refrigerator",
    Book => "book",
    Clock => "clock",
    Vase => "vase",
    Scissors => "scissors",
    TeddyBear => "teddy bear",
    HairDrier => "hair drier",
    Toothbrush => "toothbrush",
}

/// Number of detector classes.
pub const NUM_CLASSES: usize = CLASS_LABELS.len();

impl ObjectClass {
    /// Map a detector class index to a category.
    pub fn from_index(index: usize) -> Option<Self> {
        ALL_CLASSES.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        CLASS_LABELS[self as usize]
    }

    pub fn from_label(label: &str) -> Result<Self> {
        let wanted = label.trim().to_lowercase();
        CLASS_LABELS
            .iter()
            .position(|l| *l == wanted)
            .and_then(Self::from_index)
            .ok_or_else(|| anyhow!("unknown object class '{}'", label))
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for ObjectClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

impl<'de> Deserialize<'de> for ObjectClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        ObjectClass::from_label(&label).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_all_detector_indices() {
        assert_eq!(NUM_CLASSES, 80);
        assert_eq!(ObjectClass::from_index(0), Some(ObjectClass::Person));
        assert_eq!(ObjectClass::from_index(79), Some(ObjectClass::Toothbrush));
        assert_eq!(ObjectClass::from_index(80), None);
        for (i, label) in CLASS_LABELS.iter().enumerate() {
            let class = ObjectClass::from_label(label).unwrap();
            assert_eq!(class.index(), i);
        }
    }

    #[test]
    fn serializes_as_label() {
        let json = serde_json::to_string(&ObjectClass::TrafficLight).unwrap();
        assert_eq!(json, "\"traffic light\"");
        let back: ObjectClass = serde_json::from_str("\"Traffic Light\"").unwrap();
        assert_eq!(back, ObjectClass::TrafficLight);
        assert!(serde_json::from_str::<ObjectClass>("\"unicorn\"").is_err());
    }
}
