//! Brazilian federative units keyed by the two-digit IBGE prefix of
//! municipality codes.

/// A federative unit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State {
    pub code: &'static str,
    pub abbreviation: &'static str,
    pub name: &'static str,
}

pub const STATES: &[State] = &[
    State { code: "11", abbreviation: "RO", name: "Rondônia" },
    State { code: "12", abbreviation: "AC", name: "Acre" },
    State { code: "13", abbreviation: "AM", name: "Amazonas" },
    State { code: "14", abbreviation: "RR", name: "Roraima" },
    State { code: "15", abbreviation: "PA", name: "Pará" },
    State { code: "16", abbreviation: "AP", name: "Amapá" },
    State { code: "17", abbreviation: "TO", name: "Tocantins" },
    State { code: "21", abbreviation: "MA", name: "Maranhão" },
    State { code: "22", abbreviation: "PI", name: "Piauí" },
    State { code: "23", abbreviation: "CE", name: "Ceará" },
    State { code: "24", abbreviation: "RN", name: "Rio Grande do Norte" },
    State { code: "25", abbreviation: "PB", name: "Paraíba" },
    State { code: "26", abbreviation: "PE", name: "Pernambuco" },
    State { code: "27", abbreviation: "AL", name: "Alagoas" },
    State { code: "28", abbreviation: "SE", name: "Sergipe" },
    State { code: "29", abbreviation: "BA", name: "Bahia" },
    State { code: "31", abbreviation: "MG", name: "Minas Gerais" },
    State { code: "32", abbreviation: "ES", name: "Espírito Santo" },
    State { code: "33", abbreviation: "RJ", name: "Rio de Janeiro" },
    State { code: "35", abbreviation: "SP", name: "São Paulo" },
    State { code: "41", abbreviation: "PR", name: "Paraná" },
    State { code: "42", abbreviation: "SC", name: "Santa Catarina" },
    State { code: "43", abbreviation: "RS", name: "Rio Grande do Sul" },
    State { code: "50", abbreviation: "MS", name: "Mato Grosso do Sul" },
    State { code: "51", abbreviation: "MT", name: "Mato Grosso" },
    State { code: "52", abbreviation: "GO", name: "Goiás" },
    State { code: "53", abbreviation: "DF", name: "Distrito Federal" },
];

/// State of a municipality code, from its first two digits
#[must_use]
pub fn state_for_code(code: &str) -> Option<&'static State> {
    let prefix = code.trim().get(..2)?;
    STATES.iter().find(|s| s.code == prefix)
}
