use chrono::{Datelike, NaiveDate};
use serde::Serialize;

/// Month (1-12) in which a new academic year begins.
pub const DEFAULT_ACADEMIC_START_MONTH: u32 = 7;

const MIN_LENGTH: usize = 8;
const FINAL_YEAR: i32 = 4;
const CENTURY_LOOKAHEAD: i32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Branch {
    Civil,
    Eee,
    Mech,
    Ece,
    Cse,
    It,
    Csm,
    Csd,
}

impl Branch {
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "01" => Some(Branch::Civil),
            "02" => Some(Branch::Eee),
            "03" => Some(Branch::Mech),
            "04" => Some(Branch::Ece),
            "05" => Some(Branch::Cse),
            "12" => Some(Branch::It),
            "42" => Some(Branch::Csm),
            "44" => Some(Branch::Csd),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Branch::Civil => "CIVIL",
            Branch::Eee => "EEE",
            Branch::Mech => "MECH",
            Branch::Ece => "ECE",
            Branch::Cse => "CSE",
            Branch::It => "IT",
            Branch::Csm => "CSM",
            Branch::Csd => "CSD",
        }
    }
}

impl std::fmt::Display for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EntryType {
    Regular,
    LateralEntry,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcademicCalendar {
    pub start_month: u32,
}

impl Default for AcademicCalendar {
    fn default() -> Self {
        Self {
            start_month: DEFAULT_ACADEMIC_START_MONTH,
        }
    }
}

impl AcademicCalendar {
    /// Calendar year in which the academic year containing `date` started.
    pub fn academic_year(&self, date: NaiveDate) -> i32 {
        if date.month() >= self.start_month {
            date.year()
        } else {
            date.year() - 1
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassifiedIdentifier {
    pub id: String,
    pub branch: Option<Branch>,
    pub admission_year: Option<i32>,
    pub entry_type: EntryType,
    pub calculated_year: Option<u8>,
    pub warning: Option<String>,
}

/// Canonical form of a student id, shared by roster rows and session
/// record keys so the two always match.
pub fn normalize_id(id: &str) -> String {
    id.trim().to_ascii_uppercase()
}

pub fn classify(id: &str, as_of: NaiveDate) -> ClassifiedIdentifier {
    classify_with(id, as_of, &AcademicCalendar::default())
}

/// Reads branch, admission year and entry type out of a registration
/// number laid out as `YY CC E P BB RR` (e.g. `23HP1A0202`).
///
/// Never fails: anything that does not fit the layout is reported through
/// `warning` and the fields that could still be read are returned.
pub fn classify_with(
    id: &str,
    as_of: NaiveDate,
    calendar: &AcademicCalendar,
) -> ClassifiedIdentifier {
    let normalized = normalize_id(id);
    let mut warnings: Vec<String> = Vec::new();

    if normalized.is_empty() {
        return ClassifiedIdentifier {
            id: normalized,
            branch: None,
            admission_year: None,
            entry_type: EntryType::Regular,
            calculated_year: None,
            warning: Some("identifier is empty".to_string()),
        };
    }

    if normalized.len() < MIN_LENGTH || !normalized.is_ascii() {
        warnings.push(format!(
            "identifier '{normalized}' does not match the registration number layout"
        ));
    }

    let admission_year = segment(&normalized, 0, 2)
        .filter(|prefix| prefix.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|prefix| prefix.parse::<i32>().ok())
        .map(|yy| expand_century(yy, as_of));
    if admission_year.is_none() && warnings.is_empty() {
        warnings.push("admission year prefix is not numeric".to_string());
    }

    let entry_type = match segment(&normalized, 4, 5) {
        Some("1") => EntryType::Regular,
        Some("5") => EntryType::LateralEntry,
        Some(other) => {
            warnings.push(format!("unknown entry marker '{other}'"));
            EntryType::Regular
        }
        None => EntryType::Regular,
    };

    let branch = match segment(&normalized, 6, 8) {
        Some(code) => {
            let branch = Branch::from_code(code);
            if branch.is_none() {
                warnings.push(format!("unknown branch code '{code}'"));
            }
            branch
        }
        None => None,
    };

    if let Some(year) = admission_year {
        if year > calendar.academic_year(as_of) {
            warnings.push(format!("admission year {year} has not started yet"));
        }
    }

    let calculated_year =
        admission_year.map(|year| calculated_year(year, entry_type, as_of, calendar));

    ClassifiedIdentifier {
        id: normalized,
        branch,
        admission_year,
        entry_type,
        calculated_year,
        warning: if warnings.is_empty() {
            None
        } else {
            Some(warnings.join("; "))
        },
    }
}

pub fn calculated_year(
    admission_year: i32,
    entry_type: EntryType,
    as_of: NaiveDate,
    calendar: &AcademicCalendar,
) -> u8 {
    let elapsed = calendar.academic_year(as_of) - admission_year;
    let offset = match entry_type {
        EntryType::Regular => 1,
        EntryType::LateralEntry => 2,
    };
    (elapsed + offset).clamp(1, FINAL_YEAR) as u8
}

fn expand_century(yy: i32, as_of: NaiveDate) -> i32 {
    let candidate = 2000 + yy;
    if candidate > as_of.year() + CENTURY_LOOKAHEAD {
        1900 + yy
    } else {
        candidate
    }
}

fn segment(value: &str, start: usize, end: usize) -> Option<&str> {
    value.get(start..end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).unwrap()
    }

    #[test]
    fn classifies_regular_registration_number() {
        let result = classify("23HP1A0202", date(2024, 9, 1));
        assert_eq!(
            result,
            ClassifiedIdentifier {
                id: "23HP1A0202".to_string(),
                branch: Some(Branch::Eee),
                admission_year: Some(2023),
                entry_type: EntryType::Regular,
                calculated_year: Some(2),
                warning: None,
            }
        );
    }

    #[test]
    fn lateral_entrants_start_in_second_year() {
        let result = classify("24HP5A0501", date(2024, 8, 15));
        assert_eq!(result.entry_type, EntryType::LateralEntry);
        assert_eq!(result.branch, Some(Branch::Cse));
        assert_eq!(result.calculated_year, Some(2));
        assert_eq!(result.warning, None);
    }

    #[rstest]
    #[case("23hp1a0401", Branch::Ece)]
    #[case(" 23HP1A0301 ", Branch::Mech)]
    #[case("23HP1A0101", Branch::Civil)]
    #[case("23HP1A1201", Branch::It)]
    #[case("23HP1A4201", Branch::Csm)]
    #[case("23HP1A4401", Branch::Csd)]
    fn maps_branch_codes(#[case] id: &str, #[case] expected: Branch) {
        let result = classify(id, date(2024, 1, 10));
        assert_eq!(result.branch, Some(expected));
        assert_eq!(result.warning, None);
    }

    #[test]
    fn unknown_branch_code_sets_warning_but_keeps_year() {
        let result = classify("23HP1A9901", date(2024, 9, 1));
        assert_eq!(result.branch, None);
        assert_eq!(result.admission_year, Some(2023));
        assert_eq!(result.calculated_year, Some(2));
        assert!(result.warning.unwrap().contains("unknown branch code '99'"));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("AB")]
    #[case("XXHP1A0202")]
    #[case("23HP7A0202")]
    fn malformed_identifiers_warn_instead_of_failing(#[case] id: &str) {
        let result = classify(id, date(2024, 9, 1));
        assert!(result.warning.is_some(), "expected warning for {id:?}");
    }

    #[test]
    fn year_before_academic_start_counts_previous_academic_year() {
        assert_eq!(classify("23HP1A0202", date(2024, 6, 30)).calculated_year, Some(1));
        assert_eq!(classify("23HP1A0202", date(2024, 7, 1)).calculated_year, Some(2));
    }

    #[test]
    fn january_calendar_matches_plain_year_difference() {
        let calendar = AcademicCalendar { start_month: 1 };
        let result = classify_with("22HP1A0502", date(2024, 2, 1), &calendar);
        assert_eq!(result.calculated_year, Some(3));
    }

    #[test]
    fn calculated_year_is_clamped_to_programme_length() {
        assert_eq!(classify("15HP1A0502", date(2024, 9, 1)).calculated_year, Some(4));
        assert_eq!(classify("25HP1A0502", date(2024, 9, 1)).calculated_year, Some(1));
        assert_eq!(classify("21HP5A0502", date(2024, 9, 1)).calculated_year, Some(4));
    }

    #[test]
    fn calculated_year_never_decreases_across_academic_years() {
        let mut previous = 0;
        for year in 2020..2032 {
            let current = classify("21HP1A0502", date(year, 9, 1))
                .calculated_year
                .unwrap();
            assert!(current >= previous);
            previous = current;
        }
    }

    #[rstest]
    #[case("21HP1A0502")]
    #[case("26HP1A0501")]
    #[case("27HP5A0401")]
    fn calculated_year_never_decreases_for_upcoming_intakes(#[case] id: &str) {
        let mut previous = 0;
        for year in 2023..2032 {
            let result = classify(id, date(year, 9, 1));
            let current = result.calculated_year.unwrap();
            assert!(current >= previous, "{id} fell from {previous} to {current} in {year}");
            previous = current;
        }
    }

    #[test]
    fn upcoming_intake_keeps_current_century_and_warns() {
        let result = classify("26HP1A0501", date(2024, 9, 1));
        assert_eq!(result.admission_year, Some(2026));
        assert_eq!(result.calculated_year, Some(1));
        assert_eq!(result.branch, Some(Branch::Cse));
        assert!(result.warning.unwrap().contains("has not started yet"));
    }

    #[test]
    fn classification_is_repeatable() {
        let as_of = date(2025, 3, 3);
        assert_eq!(classify("22HP1A0412", as_of), classify("22HP1A0412", as_of));
    }

    #[test]
    fn future_two_digit_years_fall_back_to_previous_century() {
        assert_eq!(expand_century(99, date(2024, 1, 1)), 1999);
        assert_eq!(expand_century(25, date(2024, 1, 1)), 2025);
        assert_eq!(expand_century(26, date(2024, 1, 1)), 2026);
    }
}
