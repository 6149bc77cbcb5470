pub mod index;
pub mod query;

use tabkit::error::IndexError;
use tabkit::Config;

/// Resolves a preset name from the command line.
pub fn config_for_preset(name: &str) -> Result<Config, IndexError> {
    match name {
        "gff" => Ok(Config::gff()),
        "bed" => Ok(Config::bed()),
        "psltbl" => Ok(Config::psltbl()),
        "sam" => Ok(Config::sam()),
        "vcf" => Ok(Config::vcf()),
        "gaf" => Ok(Config::gaf()),
        other => Err(IndexError::InvalidRecord(format!(
            "unknown preset {:?}; expected gff, bed, psltbl, sam, vcf or gaf",
            other
        ))),
    }
}
