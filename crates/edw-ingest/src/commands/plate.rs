//! `edw plate` command implementation

use crate::config::SubmitConfig;
use edw_common::license_plate::plate_for_file_id;

pub fn run(ids: &[i64]) -> anyhow::Result<bool> {
    let config = SubmitConfig::from_env()?;
    for line in plates(&config.license_plate_prefix, ids)? {
        println!("{}", line);
    }
    Ok(true)
}

fn plates(prefix: &str, ids: &[i64]) -> anyhow::Result<Vec<String>> {
    ids.iter()
        .map(|&id| Ok(format!("{}\t{}", id, plate_for_file_id(prefix, id)?)))
        .collect()
}
