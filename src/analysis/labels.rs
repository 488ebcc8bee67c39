//! Closed label set of the triage classifier
//!
//! The order of [`ClassLabel::ALL`] is the output order of every classifier head,
//! so index `i` of a logit vector always refers to `ClassLabel::ALL[i]`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Triage class predicted by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassLabel {
    /// Clouding of the lens
    Cataract,
    /// Retinal vascular damage caused by diabetes
    DiabeticRetinopathy,
    /// Optic nerve damage, usually pressure related
    Glaucoma,
    /// No screened condition found
    Normal,
    /// Surface vessel swelling
    Redness,
    /// Periocular skin aging
    Wrinkles,
}

impl ClassLabel {
    /// Number of classes every classifier head must produce
    pub const COUNT: usize = 6;

    /// All labels in classifier output order
    pub const ALL: [ClassLabel; ClassLabel::COUNT] = [
        ClassLabel::Cataract,
        ClassLabel::DiabeticRetinopathy,
        ClassLabel::Glaucoma,
        ClassLabel::Normal,
        ClassLabel::Redness,
        ClassLabel::Wrinkles,
    ];

    /// Label for a classifier output index
    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Classifier output index of this label
    pub fn index(self) -> usize {
        self as usize
    }

    /// Stable identifier (e.g. `"diabetic_retinopathy"`)
    pub fn as_str(self) -> &'static str {
        match self {
            ClassLabel::Cataract => "cataract",
            ClassLabel::DiabeticRetinopathy => "diabetic_retinopathy",
            ClassLabel::Glaucoma => "glaucoma",
            ClassLabel::Normal => "normal",
            ClassLabel::Redness => "redness",
            ClassLabel::Wrinkles => "wrinkles",
        }
    }

    /// Patient-facing explanation attached to a report with this label
    pub fn explanation(self) -> &'static str {
        match self {
            ClassLabel::Cataract => {
                "A cataract is a clouding of the lens in the eye which leads to a decrease in vision. \
                 Cataracts often develop slowly and can affect one or both eyes."
            }
            ClassLabel::DiabeticRetinopathy => {
                "Diabetic retinopathy is a diabetes complication that affects the eyes. It is caused by \
                 damage to the blood vessels of the light-sensitive tissue at the back of the eye (retina)."
            }
            ClassLabel::Glaucoma => {
                "Glaucoma is a group of eye conditions that damage the optic nerve, the health of which \
                 is vital for good vision. This damage is often caused by abnormally high pressure in the eye."
            }
            ClassLabel::Normal => {
                "The eye appears to be normal with no signs of the conditions we screen for. \
                 Continue to maintain regular eye check-ups."
            }
            ClassLabel::Redness => {
                "Eye redness can be caused by many conditions, including dry eyes, allergies, infections, \
                 or eye strain. It occurs when tiny blood vessels on the surface of the eye become swollen."
            }
            ClassLabel::Wrinkles => {
                "Wrinkles around the eyes are a natural part of aging. They can also be caused by sun \
                 exposure, smoking, and repeated facial expressions."
            }
        }
    }

    /// Recommended follow-up for this label
    pub fn recommendation(self) -> &'static str {
        match self {
            ClassLabel::Cataract => {
                "Consult an ophthalmologist for proper diagnosis. Treatment may include stronger lighting, \
                 eyeglasses, or surgery if the cataract progresses and significantly affects vision."
            }
            ClassLabel::DiabeticRetinopathy => {
                "Control blood sugar levels, blood pressure, and cholesterol. Regular eye exams are crucial. \
                 Treatment may include laser treatment, injections, or surgery depending on the severity."
            }
            ClassLabel::Glaucoma => {
                "Regular eye exams are important for early detection. Treatment may include prescription \
                 eye drops, oral medications, laser treatment, or surgery to lower eye pressure."
            }
            ClassLabel::Normal => {
                "Continue with regular eye examinations every 1-2 years, or as recommended by your eye \
                 care professional. Maintain a healthy lifestyle to protect your vision."
            }
            ClassLabel::Redness => {
                "Try over-the-counter artificial tears and avoid rubbing the eyes. If redness persists or is \
                 accompanied by pain or vision changes, consult an eye care professional."
            }
            ClassLabel::Wrinkles => {
                "Protect the eyes from sun exposure with sunglasses. Use moisturizers and consider treatments \
                 like retinoids. For cosmetic concerns, consult a dermatologist."
            }
        }
    }
}

impl fmt::Display for ClassLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ClassLabel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ClassLabel::ALL
            .iter()
            .copied()
            .find(|label| label.as_str() == s)
            .ok_or_else(|| format!("Unknown class label '{s}'"))
    }
}
