use phf::phf_map;

/// Number of valence electrons that an extended Hückel parametrization assigns
/// to each element. The keys are the element symbols in upper case.
pub static VALENCE_ELECTRONS: phf::Map<&'static str, u8> = phf_map! {
    "H" => 1,
    "HE" => 2,
    "LI" => 1,
    "BE" => 2,
    "B" => 3,
    "C" => 4,
    "N" => 5,
    "O" => 6,
    "F" => 7,
    "NE" => 8,
    "NA" => 1,
    "MG" => 2,
    "AL" => 3,
    "SI" => 4,
    "P" => 5,
    "S" => 6,
    "CL" => 7,
    "AR" => 8,
    "K" => 1,
    "CA" => 2,
    "ZN" => 12,
    "GA" => 3,
    "GE" => 4,
    "AS" => 5,
    "SE" => 6,
    "BR" => 7,
    "KR" => 8,
    "SN" => 4,
    "TE" => 6,
    "I" => 7,
    "XE" => 8,
};

/// Returns the number of valence electrons of an element symbol. The lookup
/// is case insensitive, `"Cl"`, `"CL"` and `"cl"` are the same element.
pub fn valence_electrons(element: &str) -> Option<u8> {
    VALENCE_ELECTRONS
        .get(element.trim().to_uppercase().as_str())
        .copied()
}

#[test]
fn valence_electron_lookup_ignores_case() {
    assert_eq!(valence_electrons("C"), Some(4));
    assert_eq!(valence_electrons("cl"), Some(7));
    assert_eq!(valence_electrons(" S "), Some(6));
    assert_eq!(valence_electrons("Xx"), None);
}
