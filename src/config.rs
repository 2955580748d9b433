//! Fuzzer configuration (`fuzzer.toml`).
//!
//! The TOML shape is static and field casing is part of the format. Ranges
//! are written `[lower, upper]`; a bare integer is accepted as `[v, v]`.
//! [`Config::load`] parses and validates; validation failures are
//! configuration errors that terminate the program before any cycle runs.

use std::fmt;
use std::fs;
use std::path::Path;

use regex::Regex;
use serde::Deserialize;

use crate::error::{FuzzerError, Result};
use crate::rng::RandomSource;
use crate::types::KNOWN_COLLATIONS;

// ---------------------------------------------------------------------------
// IntRange
// ---------------------------------------------------------------------------

/// An inclusive integer range `[lower, upper]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct IntRange {
    pub lower: u64,
    pub upper: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRange {
    Single(u64),
    Pair([u64; 2]),
}

impl TryFrom<RawRange> for IntRange {
    type Error = String;

    fn try_from(raw: RawRange) -> std::result::Result<Self, Self::Error> {
        let (lower, upper) = match raw {
            RawRange::Single(v) => (v, v),
            RawRange::Pair([lo, hi]) => (lo, hi),
        };
        if lower > upper {
            return Err(format!("range lower bound {lower} exceeds upper bound {upper}"));
        }
        Ok(Self { lower, upper })
    }
}

impl IntRange {
    #[must_use]
    pub const fn new(lower: u64, upper: u64) -> Self {
        Self { lower, upper }
    }

    /// Draw a uniform value from the range.
    #[must_use]
    pub fn sample(&self, rng: &RandomSource) -> u64 {
        rng.u64_range(self.lower, self.upper)
    }

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.upper == 0
    }
}

impl fmt::Display for IntRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower, self.upper)
    }
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Root of `fuzzer.toml`.
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(rename = "Invalid_Name_Regexes", default)]
    pub invalid_name_regexes: NameRegexes,

    #[serde(rename = "Amounts", default)]
    pub amounts: Amounts,

    #[serde(rename = "Statement_Distribution", default)]
    pub statement_distribution: StatementDistribution,

    #[serde(rename = "Interface_Distribution", default)]
    pub interface_distribution: InterfaceDistribution,

    #[serde(rename = "Options", default)]
    pub options: Options,

    #[serde(rename = "Types", default)]
    pub types: Types,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            FuzzerError::external(format!("reading config {}", path.display()), e)
        })?;
        let config: Self = toml::from_str(&text).map_err(|e| {
            FuzzerError::external(format!("parsing config {}", path.display()), e)
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate ranges, regexes, port, and collations.
    pub fn validate(&self) -> Result<()> {
        self.invalid_name_regexes.compile()?;
        self.amounts.validate()?;
        self.statement_distribution.validate()?;
        self.interface_distribution.validate()?;
        self.options.validate()?;
        self.types.validate()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Invalid_Name_Regexes
// ---------------------------------------------------------------------------

/// Regexes rejecting generated names, one per name kind. Empty = no filter.
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct NameRegexes {
    #[serde(rename = "Branches", default)]
    pub branches: String,
    #[serde(rename = "Tables", default)]
    pub tables: String,
    #[serde(rename = "Columns", default)]
    pub columns: String,
    #[serde(rename = "Indexes", default)]
    pub indexes: String,
    #[serde(rename = "Constraints", default)]
    pub constraints: String,
}

impl NameRegexes {
    /// Compile every non-empty pattern, rejecting non-ASCII patterns.
    pub fn compile(&self) -> Result<NameFilters> {
        Ok(NameFilters {
            branches: compile_filter("Branches", &self.branches)?,
            tables: compile_filter("Tables", &self.tables)?,
            columns: compile_filter("Columns", &self.columns)?,
            indexes: compile_filter("Indexes", &self.indexes)?,
            constraints: compile_filter("Constraints", &self.constraints)?,
        })
    }
}

fn compile_filter(kind: &str, pattern: &str) -> Result<Option<Regex>> {
    if pattern.is_empty() {
        return Ok(None);
    }
    if !pattern.is_ascii() {
        return Err(FuzzerError::new(format!(
            "Invalid_Name_Regexes.{kind} must be ASCII"
        )));
    }
    Regex::new(pattern)
        .map(Some)
        .map_err(|e| FuzzerError::external(format!("Invalid_Name_Regexes.{kind}"), e))
}

/// Compiled name filters.
#[derive(Clone, Debug, Default)]
pub struct NameFilters {
    pub branches: Option<Regex>,
    pub tables: Option<Regex>,
    pub columns: Option<Regex>,
    pub indexes: Option<Regex>,
    pub constraints: Option<Regex>,
}

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

/// Target counts for generated structure.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Amounts {
    #[serde(rename = "Branches", default = "default_branches")]
    pub branches: IntRange,
    #[serde(rename = "Tables", default = "default_tables")]
    pub tables: IntRange,
    #[serde(rename = "Primary_Keys", default = "default_primary_keys")]
    pub primary_keys: IntRange,
    #[serde(rename = "Columns", default = "default_columns")]
    pub columns: IntRange,
    #[serde(rename = "Indexes", default)]
    pub indexes: Option<IntRange>,
    #[serde(rename = "Foreign_Key_Constraints", default)]
    pub foreign_key_constraints: Option<IntRange>,
    #[serde(rename = "Rows", default = "default_rows")]
    pub rows: IntRange,
    #[serde(rename = "Index_Delay", default)]
    pub index_delay: Option<IntRange>,
}

fn default_branches() -> IntRange {
    IntRange::new(1, 3)
}
fn default_tables() -> IntRange {
    IntRange::new(1, 4)
}
fn default_primary_keys() -> IntRange {
    IntRange::new(1, 2)
}
fn default_columns() -> IntRange {
    IntRange::new(2, 6)
}
fn default_rows() -> IntRange {
    IntRange::new(10, 200)
}

impl Default for Amounts {
    fn default() -> Self {
        Self {
            branches: default_branches(),
            tables: default_tables(),
            primary_keys: default_primary_keys(),
            columns: default_columns(),
            indexes: None,
            foreign_key_constraints: None,
            rows: default_rows(),
            index_delay: None,
        }
    }
}

impl Amounts {
    /// Index amount, `[0, 0]` when absent.
    #[must_use]
    pub fn indexes(&self) -> IntRange {
        self.indexes.unwrap_or(IntRange::new(0, 0))
    }

    /// Foreign-key amount, `[0, 0]` when absent.
    #[must_use]
    pub fn foreign_keys(&self) -> IntRange {
        self.foreign_key_constraints.unwrap_or(IntRange::new(0, 0))
    }

    /// Index creation delay in statements, `[0, 0]` when absent.
    #[must_use]
    pub fn index_delay(&self) -> IntRange {
        self.index_delay.unwrap_or(IntRange::new(0, 0))
    }

    fn validate(&self) -> Result<()> {
        if self.branches.lower < 1 {
            return Err(FuzzerError::new("Amounts.Branches lower bound must be >= 1"));
        }
        if self.tables.lower < 1 {
            return Err(FuzzerError::new("Amounts.Tables lower bound must be >= 1"));
        }
        if self.columns.lower < 1 {
            return Err(FuzzerError::new("Amounts.Columns lower bound must be >= 1"));
        }
        if self.primary_keys.upper > self.columns.upper {
            return Err(FuzzerError::new(format!(
                "Amounts.Primary_Keys {} cannot exceed Amounts.Columns {}",
                self.primary_keys, self.columns
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Statement_Distribution / Interface_Distribution
// ---------------------------------------------------------------------------

/// Occurrence ranges per statement kind.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StatementDistribution {
    #[serde(rename = "Insert", default = "default_weight")]
    pub insert: IntRange,
    #[serde(rename = "Replace", default = "default_zero")]
    pub replace: IntRange,
    #[serde(rename = "Update", default = "default_zero")]
    pub update: IntRange,
    #[serde(rename = "Delete", default = "default_zero")]
    pub delete: IntRange,
}

fn default_weight() -> IntRange {
    IntRange::new(1, 10)
}
fn default_zero() -> IntRange {
    IntRange::new(0, 0)
}

impl Default for StatementDistribution {
    fn default() -> Self {
        Self {
            insert: default_weight(),
            replace: default_zero(),
            update: default_zero(),
            delete: default_zero(),
        }
    }
}

impl StatementDistribution {
    fn validate(&self) -> Result<()> {
        let ranges = [self.insert, self.replace, self.update, self.delete];
        require_live_distribution("Statement_Distribution", &ranges)
    }
}

/// Occurrence ranges per transport.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InterfaceDistribution {
    #[serde(rename = "CLI_Query", default = "default_zero")]
    pub cli_query: IntRange,
    #[serde(rename = "CLI_Batch", default = "default_zero")]
    pub cli_batch: IntRange,
    #[serde(rename = "SQL_Server", default = "default_weight")]
    pub sql_server: IntRange,
}

impl Default for InterfaceDistribution {
    fn default() -> Self {
        Self {
            cli_query: default_zero(),
            cli_batch: default_zero(),
            sql_server: default_weight(),
        }
    }
}

impl InterfaceDistribution {
    fn validate(&self) -> Result<()> {
        let ranges = [self.cli_query, self.cli_batch, self.sql_server];
        require_live_distribution("Interface_Distribution", &ranges)
    }
}

fn require_live_distribution(name: &str, ranges: &[IntRange]) -> Result<()> {
    if ranges.iter().any(|r| r.lower > 0) {
        Ok(())
    } else {
        Err(FuzzerError::new(format!(
            "{name} needs at least one lower bound > 0"
        )))
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Behavioural switches.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Options {
    #[serde(rename = "Dolt_Version", default)]
    pub dolt_version: String,
    #[serde(rename = "Auto_GC", default)]
    pub auto_gc: bool,
    #[serde(rename = "Manual_GC", default)]
    pub manual_gc: bool,
    #[serde(rename = "Include_README_Config", default)]
    pub include_readme_config: bool,
    #[serde(rename = "Enforce_Rows_Lower_Bound_on_Master_Only", default)]
    pub enforce_rows_lower_bound_on_master_only: bool,
    #[serde(rename = "Logging", default = "default_true")]
    pub logging: bool,
    #[serde(rename = "Port", default = "default_port")]
    pub port: u32,
    #[serde(rename = "Delete_Successful_Runs", default)]
    pub delete_successful_runs: bool,
    #[serde(rename = "ZipInternalData", default)]
    pub zip_internal_data: bool,
    #[serde(rename = "DeleteAfterZip", default)]
    pub delete_after_zip: bool,
    #[serde(rename = "SeedInFile", default)]
    pub seed_in_file: String,
    #[serde(rename = "SeedOutFile", default)]
    pub seed_out_file: String,
}

fn default_true() -> bool {
    true
}
fn default_port() -> u32 {
    3307
}

impl Default for Options {
    fn default() -> Self {
        Self {
            dolt_version: String::new(),
            auto_gc: false,
            manual_gc: false,
            include_readme_config: false,
            enforce_rows_lower_bound_on_master_only: false,
            logging: default_true(),
            port: default_port(),
            delete_successful_runs: false,
            zip_internal_data: false,
            delete_after_zip: false,
            seed_in_file: String::new(),
            seed_out_file: String::new(),
        }
    }
}

impl Options {
    fn validate(&self) -> Result<()> {
        if self.port > 65535 {
            return Err(FuzzerError::new(format!(
                "Options.Port {} exceeds 65535",
                self.port
            )));
        }
        if self.auto_gc && self.manual_gc {
            return Err(FuzzerError::new(
                "Options.Auto_GC and Options.Manual_GC are mutually exclusive",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Column-type configuration.
#[derive(Clone, Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Types {
    #[serde(rename = "Distribution", default)]
    pub distribution: TypeDistribution,
    #[serde(rename = "Parameters", default)]
    pub parameters: TypeParameters,
}

impl Types {
    fn validate(&self) -> Result<()> {
        self.distribution.validate()?;
        self.parameters.validate()
    }
}

/// Occurrence ranges per column type.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeDistribution {
    #[serde(rename = "Bit", default = "default_zero")]
    pub bit: IntRange,
    #[serde(rename = "TinyInt", default = "default_zero")]
    pub tinyint: IntRange,
    #[serde(rename = "SmallInt", default = "default_zero")]
    pub smallint: IntRange,
    #[serde(rename = "MediumInt", default = "default_zero")]
    pub mediumint: IntRange,
    #[serde(rename = "Int", default = "default_weight")]
    pub int: IntRange,
    #[serde(rename = "BigInt", default = "default_weight")]
    pub bigint: IntRange,
    #[serde(rename = "BigInt_Unsigned", default = "default_zero")]
    pub bigint_unsigned: IntRange,
    #[serde(rename = "Float", default = "default_zero")]
    pub float: IntRange,
    #[serde(rename = "Double", default = "default_zero")]
    pub double: IntRange,
    #[serde(rename = "Decimal", default = "default_zero")]
    pub decimal: IntRange,
    #[serde(rename = "Char", default = "default_zero")]
    pub char_: IntRange,
    #[serde(rename = "Varchar", default = "default_weight")]
    pub varchar: IntRange,
    #[serde(rename = "Datetime", default = "default_zero")]
    pub datetime: IntRange,
}

impl Default for TypeDistribution {
    fn default() -> Self {
        Self {
            bit: default_zero(),
            tinyint: default_zero(),
            smallint: default_zero(),
            mediumint: default_zero(),
            int: default_weight(),
            bigint: default_weight(),
            bigint_unsigned: default_zero(),
            float: default_zero(),
            double: default_zero(),
            decimal: default_zero(),
            char_: default_zero(),
            varchar: default_weight(),
            datetime: default_zero(),
        }
    }
}

impl TypeDistribution {
    fn validate(&self) -> Result<()> {
        let ranges = [
            self.bit,
            self.tinyint,
            self.smallint,
            self.mediumint,
            self.int,
            self.bigint,
            self.bigint_unsigned,
            self.float,
            self.double,
            self.decimal,
            self.char_,
            self.varchar,
            self.datetime,
        ];
        require_live_distribution("Types.Distribution", &ranges)
    }
}

/// Parameter ranges for parameterized types, clamped to MySQL domains.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TypeParameters {
    #[serde(rename = "Bit_Width", default = "default_bit_width")]
    pub bit_width: IntRange,
    #[serde(rename = "Decimal_Precision", default = "default_decimal_precision")]
    pub decimal_precision: IntRange,
    #[serde(rename = "Decimal_Scale", default = "default_decimal_scale")]
    pub decimal_scale: IntRange,
    #[serde(rename = "Char_Length", default = "default_char_length")]
    pub char_length: IntRange,
    #[serde(rename = "Varchar_Length", default = "default_varchar_length")]
    pub varchar_length: IntRange,
    #[serde(rename = "Collations", default = "default_collations")]
    pub collations: Vec<String>,
}

fn default_bit_width() -> IntRange {
    IntRange::new(1, 64)
}
fn default_decimal_precision() -> IntRange {
    IntRange::new(1, 18)
}
fn default_decimal_scale() -> IntRange {
    IntRange::new(0, 10)
}
fn default_char_length() -> IntRange {
    IntRange::new(1, 32)
}
fn default_varchar_length() -> IntRange {
    IntRange::new(1, 64)
}
fn default_collations() -> Vec<String> {
    vec!["utf8mb4_0900_bin".to_owned()]
}

impl Default for TypeParameters {
    fn default() -> Self {
        Self {
            bit_width: default_bit_width(),
            decimal_precision: default_decimal_precision(),
            decimal_scale: default_decimal_scale(),
            char_length: default_char_length(),
            varchar_length: default_varchar_length(),
            collations: default_collations(),
        }
    }
}

impl TypeParameters {
    fn validate(&self) -> Result<()> {
        check_domain("Types.Parameters.Bit_Width", self.bit_width, 1, 64)?;
        check_domain(
            "Types.Parameters.Decimal_Precision",
            self.decimal_precision,
            1,
            18,
        )?;
        check_domain("Types.Parameters.Decimal_Scale", self.decimal_scale, 0, 18)?;
        if self.decimal_scale.upper > self.decimal_precision.upper {
            return Err(FuzzerError::new(
                "Types.Parameters.Decimal_Scale cannot exceed Decimal_Precision",
            ));
        }
        check_domain("Types.Parameters.Char_Length", self.char_length, 0, 255)?;
        check_domain("Types.Parameters.Varchar_Length", self.varchar_length, 0, 1024)?;
        if self.collations.is_empty() {
            return Err(FuzzerError::new(
                "Types.Parameters.Collations must list at least one collation",
            ));
        }
        for collation in &self.collations {
            if !KNOWN_COLLATIONS.contains(&collation.as_str()) {
                return Err(FuzzerError::new(format!(
                    "unknown collation {collation:?} (known: {})",
                    KNOWN_COLLATIONS.join(", ")
                )));
            }
        }
        Ok(())
    }
}

fn check_domain(name: &str, range: IntRange, min: u64, max: u64) -> Result<()> {
    if range.lower < min || range.upper > max {
        return Err(FuzzerError::new(format!(
            "{name} {range} outside valid domain [{min}, {max}]"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Config {
        toml::from_str(text).expect("parse")
    }

    #[test]
    fn empty_config_gets_defaults_and_validates() {
        let config = parse("");
        config.validate().unwrap();
        assert_eq!(config.amounts.branches, IntRange::new(1, 3));
        assert_eq!(config.options.port, 3307);
        assert!(config.options.logging);
    }

    #[test]
    fn single_value_range_expands() {
        let config = parse("[Amounts]\nBranches = 2\n");
        assert_eq!(config.amounts.branches, IntRange::new(2, 2));
    }

    #[test]
    fn inverted_range_is_rejected_at_parse() {
        let err = toml::from_str::<Config>("[Amounts]\nBranches = [3, 1]\n").unwrap_err();
        assert!(err.to_string().contains("exceeds"));
    }

    #[test]
    fn unknown_field_is_rejected() {
        assert!(toml::from_str::<Config>("[Amounts]\nBranchez = 2\n").is_err());
    }

    #[test]
    fn branches_lower_bound_must_be_positive() {
        let config = parse("[Amounts]\nBranches = [0, 2]\n");
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("Branches"));
    }

    #[test]
    fn primary_keys_cannot_exceed_columns() {
        let config = parse("[Amounts]\nPrimary_Keys = [1, 9]\nColumns = [2, 3]\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn statement_distribution_needs_a_live_lower_bound() {
        let config = parse(
            "[Statement_Distribution]\nInsert = [0, 5]\nReplace = [0, 1]\n\
             Update = [0, 1]\nDelete = [0, 1]\n",
        );
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("Statement_Distribution"));
    }

    #[test]
    fn port_upper_bound() {
        let config = parse("[Options]\nPort = 70000\n");
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("65535"));
    }

    #[test]
    fn gc_modes_are_exclusive() {
        let config = parse("[Options]\nAuto_GC = true\nManual_GC = true\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn bad_regex_is_a_config_error() {
        let config = parse("[Invalid_Name_Regexes]\nTables = \"[unclosed\"\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn non_ascii_regex_is_rejected() {
        let config = parse("[Invalid_Name_Regexes]\nTables = \"né\"\n");
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("ASCII"));
    }

    #[test]
    fn compiled_filters_match() {
        let config = parse("[Invalid_Name_Regexes]\nTables = \"^bad\"\n");
        let filters = config.invalid_name_regexes.compile().unwrap();
        assert!(filters.tables.as_ref().unwrap().is_match("badname"));
        assert!(!filters.tables.as_ref().unwrap().is_match("goodname"));
        assert!(filters.branches.is_none());
    }

    #[test]
    fn unknown_collation_is_rejected() {
        let config = parse("[Types.Parameters]\nCollations = [\"klingon_bin\"]\n");
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("klingon_bin"));
    }

    #[test]
    fn bit_width_clamped_to_mysql_domain() {
        let config = parse("[Types.Parameters]\nBit_Width = [1, 65]\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn decimal_scale_cannot_exceed_precision() {
        let config =
            parse("[Types.Parameters]\nDecimal_Precision = [1, 8]\nDecimal_Scale = [0, 9]\n");
        assert!(config.validate().is_err());
    }

    #[test]
    fn full_config_round_trip() {
        let text = r#"
[Invalid_Name_Regexes]
Branches = "^dolt"
Tables = "^dolt"

[Amounts]
Branches = [1, 2]
Tables = [1, 3]
Primary_Keys = [1, 2]
Columns = [2, 4]
Indexes = [0, 2]
Foreign_Key_Constraints = [0, 0]
Rows = [3, 50]
Index_Delay = [0, 10]

[Statement_Distribution]
Insert = [5, 10]
Replace = [1, 2]
Update = [1, 4]
Delete = [0, 2]

[Interface_Distribution]
CLI_Query = [1, 3]
CLI_Batch = [1, 3]
SQL_Server = [2, 8]

[Options]
Dolt_Version = "1.50.0"
Manual_GC = true
Logging = true
Port = 3307
Delete_Successful_Runs = true
ZipInternalData = true
DeleteAfterZip = false
SeedInFile = ""
SeedOutFile = "seed.txt"

[Types.Distribution]
Bit = [1, 2]
Int = [3, 6]
BigInt = [3, 6]
Varchar = [2, 4]

[Types.Parameters]
Bit_Width = [1, 16]
Varchar_Length = [1, 24]
Collations = ["utf8mb4_0900_bin", "utf8mb4_general_ci"]
"#;
        let config = parse(text);
        config.validate().unwrap();
        assert_eq!(config.amounts.rows, IntRange::new(3, 50));
        assert_eq!(config.options.seed_out_file, "seed.txt");
        assert_eq!(config.types.parameters.collations.len(), 2);
        assert_eq!(config.amounts.indexes(), IntRange::new(0, 2));
    }
}
