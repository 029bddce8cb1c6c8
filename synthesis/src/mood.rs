//! Seven-dimensional mood vector attached to every crystal.

use serde::{Deserialize, Serialize};

/// Names of the mood dimensions, in vector order.
pub const MOOD_DIMENSIONS: [&str; 7] = [
    "warmth",
    "weight",
    "tempo",
    "texture",
    "brightness",
    "saturation",
    "complexity",
];

/// Affective signature of a crystal. Every component lies in `[-1, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Mood {
    /// Cold/clinical (-1) to warm/intimate (+1)
    pub warmth: f64,
    /// Light/playful (-1) to heavy/serious (+1)
    pub weight: f64,
    /// Slow/deliberate (-1) to fast/urgent (+1)
    pub tempo: f64,
    /// Smooth (-1) to rough/turbulent (+1)
    pub texture: f64,
    /// Dim/uncertain (-1) to bright/confident (+1)
    pub brightness: f64,
    /// Muted (-1) to vivid/intense (+1)
    pub saturation: f64,
    /// Simple (-1) to intricate (+1)
    pub complexity: f64,
}

impl Mood {
    /// The all-zero mood.
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Build from components in [`MOOD_DIMENSIONS`] order.
    pub fn from_array(values: [f64; 7]) -> Self {
        Self {
            warmth: values[0],
            weight: values[1],
            tempo: values[2],
            texture: values[3],
            brightness: values[4],
            saturation: values[5],
            complexity: values[6],
        }
    }

    /// Components in [`MOOD_DIMENSIONS`] order.
    pub fn as_array(&self) -> [f64; 7] {
        [
            self.warmth,
            self.weight,
            self.tempo,
            self.texture,
            self.brightness,
            self.saturation,
            self.complexity,
        ]
    }

    /// Check every component is finite and in `[-1, 1]`.
    ///
    /// Returns the name of the first offending dimension.
    pub fn validate(&self) -> Result<(), &'static str> {
        for (name, value) in MOOD_DIMENSIONS.iter().zip(self.as_array()) {
            if !value.is_finite() || !(-1.0..=1.0).contains(&value) {
                return Err(*name);
            }
        }
        Ok(())
    }

    /// Component-wise mean of a set of moods; neutral when empty.
    pub fn blend<'a>(moods: impl IntoIterator<Item = &'a Mood>) -> Mood {
        let mut sum = [0.0; 7];
        let mut count = 0usize;

        for mood in moods {
            for (acc, value) in sum.iter_mut().zip(mood.as_array()) {
                *acc += value;
            }
            count += 1;
        }

        if count == 0 {
            return Mood::neutral();
        }
        Mood::from_array(sum.map(|v| v / count as f64))
    }

    /// Dimension with the largest magnitude, or `None` for a neutral mood.
    pub fn dominant(&self) -> Option<(&'static str, f64)> {
        MOOD_DIMENSIONS
            .iter()
            .zip(self.as_array())
            .filter(|(_, v)| *v != 0.0)
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(name, value)| (*name, value))
    }
}
