//! ICD-10 chapters used as the default diagnosis categories.

/// One ICD-10 chapter
#[derive(Debug, Clone, Copy)]
pub struct Chapter {
    /// Roman numeral of the chapter
    pub numeral: &'static str,
    /// Inclusive range of three-character codes
    pub range: &'static str,
    /// Short category label
    pub label: &'static str,
}

pub const ICD10_CHAPTERS: &[Chapter] = &[
    Chapter { numeral: "I", range: "A00-B99", label: "Infectious" },
    Chapter { numeral: "II", range: "C00-D48", label: "Neoplasms" },
    Chapter { numeral: "III", range: "D50-D89", label: "Blood" },
    Chapter { numeral: "IV", range: "E00-E90", label: "Endocrine" },
    Chapter { numeral: "V", range: "F00-F99", label: "Mental" },
    Chapter { numeral: "VI", range: "G00-G99", label: "Nervous" },
    Chapter { numeral: "VII", range: "H00-H59", label: "Eye" },
    Chapter { numeral: "VIII", range: "H60-H95", label: "Ear" },
    Chapter { numeral: "IX", range: "I00-I99", label: "Circulatory" },
    Chapter { numeral: "X", range: "J00-J99", label: "Respiratory" },
    Chapter { numeral: "XI", range: "K00-K93", label: "Digestive" },
    Chapter { numeral: "XII", range: "L00-L99", label: "Skin" },
    Chapter { numeral: "XIII", range: "M00-M99", label: "Musculoskeletal" },
    Chapter { numeral: "XIV", range: "N00-N99", label: "Genitourinary" },
    Chapter { numeral: "XV", range: "O00-O99", label: "Pregnancy" },
    Chapter { numeral: "XVI", range: "P00-P96", label: "Perinatal" },
    Chapter { numeral: "XVII", range: "Q00-Q99", label: "Congenital" },
    Chapter { numeral: "XVIII", range: "R00-R99", label: "Symptoms" },
    Chapter { numeral: "XIX", range: "S00-T98", label: "Injury" },
    Chapter { numeral: "XX", range: "V01-Y98", label: "External causes" },
    Chapter { numeral: "XXI", range: "Z00-Z99", label: "Health services" },
    Chapter { numeral: "XXII", range: "U00-U99", label: "Special purposes" },
];

/// Look up a chapter by its roman numeral
#[must_use]
pub fn by_numeral(numeral: &str) -> Option<&'static Chapter> {
    ICD10_CHAPTERS.iter().find(|c| c.numeral.eq_ignore_ascii_case(numeral))
}
