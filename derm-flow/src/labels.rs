//! The DermNet label set.
//!
//! Order matters: index `i` is the `i`-th logit of the model head. Reordering
//! this list without retraining silently breaks every prediction, so treat it
//! as part of the versioned model contract.

pub const NUM_CLASSES: usize = 23;

pub const DERMNET_CLASSES: [&str; NUM_CLASSES] = [
    "Acne and Rosacea Photos",
    "Actinic Keratosis Basal Cell Carcinoma and other Malignant Lesions",
    "Atopic Dermatitis Photos",
    "Bullous Disease Photos",
    "Cellulitis Impetigo and other Bacterial Infections",
    "Eczema Photos",
    "Exanthems and Drug Eruptions",
    "Hair Loss Photos Alopecia and other Hair Diseases",
    "Herpes HPV and other STDs Photos",
    "Light Diseases and Disorders of Pigmentation",
    "Lupus and other Connective Tissue diseases",
    "Melanoma Skin Cancer Nevi and Moles",
    "Nail Fungus and other Nail Disease",
    "Poison Ivy Photos and other Contact Dermatitis",
    "Psoriasis pictures Lichen Planus and related diseases",
    "Scabies Lyme Disease and other Infestations and Bites",
    "Seborrheic Keratoses and other Benign Tumors",
    "Systemic Disease",
    "Tinea Ringworm Candidiasis and other Fungal Infections",
    "Urticaria Hives",
    "Vascular Tumors",
    "Vasculitis Photos",
    "Warts Molluscum and other Viral Infections",
];

/// Index of a label in the model head, if it belongs to the set.
pub fn class_index(label: &str) -> Option<usize> {
    DERMNET_CLASSES.iter().position(|c| *c == label)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_order_is_stable() {
        assert_eq!(DERMNET_CLASSES[0], "Acne and Rosacea Photos");
        assert_eq!(class_index("Eczema Photos"), Some(5));
        assert_eq!(class_index("Melanoma Skin Cancer Nevi and Moles"), Some(11));
        assert_eq!(
            DERMNET_CLASSES[NUM_CLASSES - 1],
            "Warts Molluscum and other Viral Infections"
        );
    }

    #[test]
    fn test_labels_are_unique() {
        let mut sorted = DERMNET_CLASSES.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), NUM_CLASSES);
        assert_eq!(class_index("Sunburn"), None);
    }
}
