use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Wire keyword for the municipality/organization all-sentinel.
pub const ALL_KEYWORD: &str = "ALL";

/// Reference population for the bias trend denominator. Markers are defined
/// against the grade-4 Russian-language test regardless of the subject the
/// user is currently viewing.
pub const REFERENCE_GRADE: i64 = 4;
pub const REFERENCE_SUBJECT: &str = "Русский язык";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Ru4,
    Ma4,
    Ru5,
    Ma5,
}

impl Marker {
    /// Flag order matches the `BiasRow::flags` array.
    pub const ALL: [Marker; 4] = [Marker::Ru4, Marker::Ma4, Marker::Ru5, Marker::Ma5];

    pub fn key(self) -> &'static str {
        match self {
            Marker::Ru4 => "ru4",
            Marker::Ma4 => "ma4",
            Marker::Ru5 => "ru5",
            Marker::Ma5 => "ma5",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Marker::Ru4 => "4 РУ",
            Marker::Ma4 => "4 МА",
            Marker::Ru5 => "5 РУ",
            Marker::Ma5 => "5 МА",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarkRow {
    pub year: i64,
    pub grade: i64,
    pub subject: String,
    pub municipality: String,
    pub school: String,
    pub login: String,
    pub participants: i64,
    pub pct2: f64,
    pub pct3: f64,
    pub pct4: f64,
    pub pct5: f64,
}

#[derive(Debug, Clone)]
pub struct ScoreRow {
    pub year: i64,
    pub grade: i64,
    pub subject: String,
    pub login: String,
    pub participants: i64,
    /// Percent of students per raw score point. An absent key is a missing
    /// value in the source export, not an observed zero.
    pub points: BTreeMap<u32, f64>,
}

#[derive(Debug, Clone)]
pub struct BiasRow {
    pub year: i64,
    pub login: String,
    pub municipality: String,
    pub school: String,
    /// `Marker::ALL` order.
    pub flags: [bool; 4],
    pub marker_count: i64,
}

impl BiasRow {
    pub fn active_markers(&self) -> Vec<Marker> {
        Marker::ALL
            .iter()
            .copied()
            .zip(self.flags.iter().copied())
            .filter(|&(_, set)| set)
            .map(|(m, _)| m)
            .collect()
    }

    pub fn flagged(&self) -> bool {
        self.marker_count > 0
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CalcError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl CalcError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

// ---------------------------------------------------------------------------
// Filter selection
// ---------------------------------------------------------------------------

/// A selection as the shell last saw it. Every field is optional: stale or
/// absent values fall back during resolution, they are never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterSelection {
    pub year: Option<i64>,
    pub grade: Option<i64>,
    pub subject: Option<String>,
    pub municipality: Option<String>,
    pub organization: Option<String>,
}

/// A fully resolved selection. `None` for municipality/organization means
/// the all-sentinel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedFilters {
    pub year: i64,
    pub grade: i64,
    pub subject: String,
    pub municipality: Option<String>,
    pub organization: Option<String>,
}

/// Option domains per cascade level, without the all-sentinel entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterOptions {
    pub years: Vec<i64>,
    pub grades: Vec<i64>,
    pub subjects: Vec<String>,
    pub municipalities: Vec<String>,
    /// Empty while no municipality is selected.
    pub organizations: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FilterModel<'a> {
    pub selection: ResolvedFilters,
    pub options: FilterOptions,
    /// Marks rows matching the resolved selection, so callers aggregate
    /// without re-filtering.
    pub subset: Vec<&'a MarkRow>,
}

pub fn parse_filter_selection(
    raw: Option<&serde_json::Value>,
) -> Result<FilterSelection, CalcError> {
    let Some(raw) = raw else {
        return Ok(FilterSelection::default());
    };
    let Some(obj) = raw.as_object() else {
        return Err(CalcError::new("bad_params", "filters must be an object"));
    };

    Ok(FilterSelection {
        year: opt_int_field(obj, "year")?,
        grade: opt_int_field(obj, "grade")?,
        subject: opt_string_field(obj, "subject")?,
        municipality: opt_string_field(obj, "municipality")?,
        organization: opt_string_field(obj, "organization")?,
    })
}

fn opt_int_field(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<i64>, CalcError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v)
            if v.as_str()
                .map(|s| s.eq_ignore_ascii_case(ALL_KEYWORD))
                .unwrap_or(false) =>
        {
            Ok(None)
        }
        Some(v) => match v.as_i64() {
            Some(n) => Ok(Some(n)),
            None => Err(CalcError::new(
                "bad_params",
                format!("filters.{} must be an integer or null", key),
            )),
        },
    }
}

fn opt_string_field(
    obj: &serde_json::Map<String, serde_json::Value>,
    key: &str,
) -> Result<Option<String>, CalcError> {
    match obj.get(key) {
        None => Ok(None),
        Some(v) if v.is_null() => Ok(None),
        Some(v) => {
            let Some(s) = v.as_str() else {
                return Err(CalcError::new(
                    "bad_params",
                    format!("filters.{} must be a string or null", key),
                ));
            };
            let t = s.trim();
            // Subject/municipality values are exact Cyrillic data values,
            // only the ALL keyword is case-insensitive.
            if t.is_empty() || t.eq_ignore_ascii_case(ALL_KEYWORD) {
                Ok(None)
            } else {
                Ok(Some(t.to_string()))
            }
        }
    }
}

fn distinct_sorted<T, I>(values: I) -> Vec<T>
where
    T: Ord,
    I: IntoIterator<Item = T>,
{
    let set: BTreeSet<T> = values.into_iter().collect();
    set.into_iter().collect()
}

fn keep_or_first<T: PartialEq + Clone>(prior: Option<&T>, options: &[T]) -> Option<T> {
    match prior {
        Some(v) if options.contains(v) => Some(v.clone()),
        _ => options.first().cloned(),
    }
}

/// Resolves the prior selection against freshly derived option domains.
///
/// Each level's options come only from rows matching every higher level
/// (year > grade > subject > municipality > organization). A prior value
/// still present in its fresh domain is kept; anything stale falls back to
/// the first option (years are listed most-recent-first, municipality and
/// organization fall back to the all-sentinel).
pub fn resolve_filters<'a>(
    marks: &'a [MarkRow],
    prior: &FilterSelection,
) -> Result<FilterModel<'a>, CalcError> {
    let mut years = distinct_sorted(marks.iter().map(|r| r.year));
    years.reverse();
    let Some(year) = keep_or_first(prior.year.as_ref(), &years) else {
        return Err(CalcError::new("empty_options", "marks data has no years"));
    };

    let year_rows: Vec<&MarkRow> = marks.iter().filter(|r| r.year == year).collect();
    let grades = distinct_sorted(year_rows.iter().map(|r| r.grade));
    let Some(grade) = keep_or_first(prior.grade.as_ref(), &grades) else {
        return Err(CalcError::new(
            "empty_options",
            format!("no grades for year {}", year),
        ));
    };

    let grade_rows: Vec<&MarkRow> = year_rows.into_iter().filter(|r| r.grade == grade).collect();
    let subjects = distinct_sorted(grade_rows.iter().map(|r| r.subject.clone()));
    let Some(subject) = keep_or_first(prior.subject.as_ref(), &subjects) else {
        return Err(CalcError::new(
            "empty_options",
            format!("no subjects for year {} grade {}", year, grade),
        ));
    };

    let subject_rows: Vec<&MarkRow> = grade_rows
        .into_iter()
        .filter(|r| r.subject == subject)
        .collect();
    let municipalities = distinct_sorted(subject_rows.iter().map(|r| r.municipality.clone()));
    if municipalities.is_empty() {
        return Err(CalcError::new(
            "empty_options",
            format!("no municipalities for subject {}", subject),
        ));
    }
    // A stale municipality falls back to the all-sentinel, never to an
    // arbitrary concrete one.
    let municipality = prior
        .municipality
        .as_ref()
        .filter(|m| municipalities.contains(*m))
        .cloned();

    let (organizations, organization, subset) = match &municipality {
        None => (Vec::new(), None, subject_rows),
        Some(mun) => {
            let mun_rows: Vec<&MarkRow> = subject_rows
                .into_iter()
                .filter(|r| &r.municipality == mun)
                .collect();
            let organizations = distinct_sorted(mun_rows.iter().map(|r| r.school.clone()));
            let organization = prior
                .organization
                .as_ref()
                .filter(|o| organizations.contains(*o))
                .cloned();
            let subset = match &organization {
                None => mun_rows,
                Some(org) => mun_rows.into_iter().filter(|r| &r.school == org).collect(),
            };
            (organizations, organization, subset)
        }
    };

    Ok(FilterModel {
        selection: ResolvedFilters {
            year,
            grade,
            subject,
            municipality,
            organization,
        },
        options: FilterOptions {
            years,
            grades,
            subjects,
            municipalities,
            organizations,
        },
        subset,
    })
}

// ---------------------------------------------------------------------------
// Weighted aggregation primitive
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Tenths,
    Whole,
}

impl Rounding {
    fn apply(self, v: f64) -> f64 {
        match self {
            Rounding::Tenths => (v * 10.0).round() / 10.0,
            Rounding::Whole => v.round(),
        }
    }
}

fn clamp_percent(v: f64) -> f64 {
    v.clamp(0.0, 100.0)
}

/// Participant-weighted percentage over `(percent, participant_count)` parts.
/// Upstream exports overshoot 100 through rounding; the clamp is policy, not
/// a workaround, and both distribution aggregators share it.
pub fn weighted_percent<I>(parts: I, total: i64, rounding: Rounding) -> f64
where
    I: IntoIterator<Item = (f64, i64)>,
{
    if total <= 0 {
        return 0.0;
    }
    let absolute: f64 = parts
        .into_iter()
        .map(|(pct, count)| pct / 100.0 * count as f64)
        .sum();
    clamp_percent(rounding.apply(absolute / total as f64 * 100.0))
}

/// Share of `numerator` in `denominator`, same clamp policy as
/// [`weighted_percent`]. Zero denominator is a defined 0, never a fault.
pub fn ratio_percent(numerator: usize, denominator: usize, rounding: Rounding) -> f64 {
    if denominator == 0 {
        return 0.0;
    }
    clamp_percent(rounding.apply(numerator as f64 / denominator as f64 * 100.0))
}

// ---------------------------------------------------------------------------
// Mark distribution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkSummary {
    pub participants: i64,
    pub pct2: f64,
    pub pct3: f64,
    pub pct4: f64,
    pub pct5: f64,
    /// Share of marks 4 and 5.
    pub quality: f64,
    /// Share of marks 3, 4 and 5.
    pub success: f64,
}

/// `None` means "nothing to show" (empty subset). Zero participants across a
/// non-empty subset is a defined all-zero summary instead.
pub fn mark_summary(rows: &[&MarkRow]) -> Option<MarkSummary> {
    if rows.is_empty() {
        return None;
    }
    let total: i64 = rows.iter().map(|r| r.participants).sum();

    let share = |pick: fn(&MarkRow) -> f64| {
        weighted_percent(
            rows.iter().map(|r| (pick(r), r.participants)),
            total,
            Rounding::Tenths,
        )
    };
    let pct2 = share(|r| r.pct2);
    let pct3 = share(|r| r.pct3);
    let pct4 = share(|r| r.pct4);
    let pct5 = share(|r| r.pct5);

    // Clamp the sums, not only the components: two already-clamped shares
    // can still add up past 100.
    let quality = clamp_percent(Rounding::Tenths.apply(pct4 + pct5));
    let success = clamp_percent(Rounding::Tenths.apply(pct3 + pct4 + pct5));

    Some(MarkSummary {
        participants: total,
        pct2,
        pct3,
        pct4,
        pct5,
        quality,
        success,
    })
}

// ---------------------------------------------------------------------------
// Raw-score distribution
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSeries {
    pub participants: i64,
    pub max_score: u32,
    /// Dense: index = raw score point, length = `max_score + 1`. Points with
    /// no observations hold 0.0, callers never skip gaps.
    pub values: Vec<f64>,
}

/// Weighted percent-of-students per raw score point.
///
/// The Scores table carries no municipality/organization columns; the
/// selection propagates through `eligible_logins`, the logins of the
/// currently filtered Marks subset. Active score points are discovered on
/// the year/grade/subject slice before the login join, so the axis does not
/// shrink when a single school is selected.
pub fn score_series(
    scores: &[ScoreRow],
    selection: &ResolvedFilters,
    eligible_logins: &BTreeSet<&str>,
) -> Option<ScoreSeries> {
    let slice: Vec<&ScoreRow> = scores
        .iter()
        .filter(|r| {
            r.year == selection.year
                && r.grade == selection.grade
                && r.subject == selection.subject
        })
        .collect();

    let max_score = slice.iter().flat_map(|r| r.points.keys().copied()).max()?;

    let joined: Vec<&ScoreRow> = slice
        .into_iter()
        .filter(|r| eligible_logins.contains(r.login.as_str()))
        .collect();
    if joined.is_empty() {
        return None;
    }
    let total: i64 = joined.iter().map(|r| r.participants).sum();
    if total <= 0 {
        return None;
    }

    let values: Vec<f64> = (0..=max_score)
        .map(|point| {
            weighted_percent(
                joined
                    .iter()
                    .map(|r| (r.points.get(&point).copied().unwrap_or(0.0), r.participants)),
                total,
                Rounding::Tenths,
            )
        })
        .collect();

    Some(ScoreSeries {
        participants: total,
        max_score,
        values,
    })
}

// ---------------------------------------------------------------------------
// Bias markers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PriorYearFlag {
    pub year: i64,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolBiasReport {
    pub login: String,
    pub year: i64,
    pub marker_count: i64,
    /// Display labels of the active markers. Empty when the school has no
    /// record this year — absence is the expected case, not an error.
    pub markers: Vec<String>,
    /// Ordered `[year-1, year-2]`. Years before the dataset floor are
    /// reported unflagged.
    pub prior_years: Vec<PriorYearFlag>,
}

/// Per-school marker lookup. `logins` is the distinct login set of the
/// filtered Marks subset for the chosen organization; one display name
/// mapping to several logins is a real data-quality case and the lookup
/// refuses to pick one silently.
pub fn school_bias(
    bias: &[BiasRow],
    year: i64,
    logins: &BTreeSet<String>,
) -> Result<SchoolBiasReport, CalcError> {
    let mut it = logins.iter();
    let (Some(login), None) = (it.next(), it.next()) else {
        return Err(CalcError::new(
            "ambiguous_login",
            "the selected school does not resolve to exactly one login",
        )
        .with_details(json!({ "logins": logins })));
    };

    let current = bias.iter().find(|r| r.year == year && &r.login == login);
    let (marker_count, markers) = match current {
        Some(r) => (
            r.marker_count,
            r.active_markers()
                .into_iter()
                .map(|m| m.label().to_string())
                .collect(),
        ),
        None => (0, Vec::new()),
    };

    let prior_years = (1..=2)
        .map(|back| {
            let y = year - back;
            PriorYearFlag {
                year: y,
                flagged: bias
                    .iter()
                    .any(|r| r.year == y && &r.login == login && r.flagged()),
            }
        })
        .collect();

    Ok(SchoolBiasReport {
        login: login.clone(),
        year,
        marker_count,
        markers,
        prior_years,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub year: i64,
    pub percent: f64,
    /// True when the reference population for this year is empty; the 0 is
    /// then "no reference data", not a measured 0%.
    pub missing_reference: bool,
    pub highlight: bool,
}

/// Percent of schools flagged, per year of the `[year-2, year]` window.
///
/// The denominator is the distinct-login count of the grade-4
/// Russian-language population, not of the currently viewed subject.
/// Numerator and denominator come from different datasets joined on login.
/// Whole-percent rounding is intentional, unlike the one-decimal
/// distributions.
pub fn regional_trend(
    marks: &[MarkRow],
    bias: &[BiasRow],
    year: i64,
    municipality: Option<&str>,
) -> Vec<TrendPoint> {
    (year - 2..=year)
        .map(|y| {
            let reference: BTreeSet<&str> = marks
                .iter()
                .filter(|r| {
                    r.year == y
                        && r.grade == REFERENCE_GRADE
                        && r.subject == REFERENCE_SUBJECT
                        && municipality.map_or(true, |m| r.municipality == m)
                })
                .map(|r| r.login.as_str())
                .collect();
            let flagged: BTreeSet<&str> = bias
                .iter()
                .filter(|r| {
                    r.year == y && r.flagged() && municipality.map_or(true, |m| r.municipality == m)
                })
                .map(|r| r.login.as_str())
                .collect();

            TrendPoint {
                year: y,
                percent: ratio_percent(flagged.len(), reference.len(), Rounding::Whole),
                missing_reference: reference.is_empty(),
                highlight: y == year,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedSchool {
    pub school: String,
    pub login: String,
    pub marker_count: i64,
    pub markers: Vec<String>,
}

/// Schools with at least one marker this year, most markers first. The sort
/// is stable: equal counts keep dataset load order.
pub fn flagged_schools(
    bias: &[BiasRow],
    year: i64,
    municipality: Option<&str>,
) -> Vec<FlaggedSchool> {
    let mut rows: Vec<FlaggedSchool> = bias
        .iter()
        .filter(|r| {
            r.year == year && r.flagged() && municipality.map_or(true, |m| r.municipality == m)
        })
        .map(|r| FlaggedSchool {
            school: r.school.clone(),
            login: r.login.clone(),
            marker_count: r.marker_count,
            markers: r
                .active_markers()
                .into_iter()
                .map(|m| m.label().to_string())
                .collect(),
        })
        .collect();
    rows.sort_by(|a, b| b.marker_count.cmp(&a.marker_count));
    rows
}
