//! Named format checks
//!
//! Every manifest row declares a `format`. After a file is hashed it is handed
//! to a [`FormatValidator`] by that name. The built-in [`SignatureValidator`]
//! sniffs magic numbers and the first records of text formats; a site can
//! point `EDW_FORMAT_VALIDATOR` at a full validator instead, run through
//! [`CommandValidator`].

use crate::error::{IngestError, Result};
use async_trait::async_trait;
use flate2::read::MultiGzDecoder;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// How much of a file the built-in checks look at
const SNIFF_BYTES: u64 = 64 * 1024;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const BIGWIG_MAGIC: u32 = 0x888F_FC26;
const BIGBED_MAGIC: u32 = 0x8789_F2EB;
const TWOBIT_MAGIC: u32 = 0x1A41_2743;

/// bigBed flavours accepted by name
const BIGBED_FORMATS: &[&str] = &[
    "bigBed",
    "bedLogR",
    "bedRrbs",
    "bedMethyl",
    "broadPeak",
    "narrowPeak",
    "bedRnaElements",
    "openChromCombinedPeaks",
    "peptideMapping",
    "shortFrags",
];

/// What kind of check a declared format gets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatFamily {
    /// Explicit pass-through
    Unknown,
    Fastq,
    Bam,
    /// Plain tab-separated BED, including `bed_<flavour>`
    BedText,
    Gtf,
    BigWig,
    BigBed,
    Fasta,
    TwoBit,
    Rcc,
    Idat,
    CustomTrack,
}

impl FormatFamily {
    /// Text formats may be legitimately empty ("no results" outputs)
    fn allows_empty(self) -> bool {
        matches!(
            self,
            FormatFamily::Unknown
                | FormatFamily::Fastq
                | FormatFamily::BedText
                | FormatFamily::Gtf
                | FormatFamily::Fasta
                | FormatFamily::CustomTrack
        )
    }
}

/// A declared format name with its check family
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFormat {
    name: String,
    family: FormatFamily,
}

impl FileFormat {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> FormatFamily {
        self.family
    }

    pub fn is_fastq(&self) -> bool {
        self.family == FormatFamily::Fastq
    }
}

impl std::fmt::Display for FileFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}

impl std::str::FromStr for FileFormat {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        let family = match s {
            "unknown" => FormatFamily::Unknown,
            "fastq" => FormatFamily::Fastq,
            "bam" => FormatFamily::Bam,
            "bed" => FormatFamily::BedText,
            "gtf" => FormatFamily::Gtf,
            "bigWig" => FormatFamily::BigWig,
            "fasta" => FormatFamily::Fasta,
            "2bit" => FormatFamily::TwoBit,
            "rcc" => FormatFamily::Rcc,
            "idat" => FormatFamily::Idat,
            "customTrack" => FormatFamily::CustomTrack,
            name if BIGBED_FORMATS.contains(&name) => FormatFamily::BigBed,
            name if name
                .strip_prefix("bed_")
                .is_some_and(|flavour| BIGBED_FORMATS.contains(&flavour)) =>
            {
                FormatFamily::BedText
            },
            other => return Err(IngestError::row(format!("Format '{}' is not supported", other))),
        };

        Ok(Self {
            name: s.to_string(),
            family,
        })
    }
}

/// Checks a file against its declared format
#[async_trait]
pub trait FormatValidator: Send + Sync {
    /// `Ok(())` on pass, `RowValidation` with the reason on fail.
    async fn check(&self, format: &FileFormat, path: &Path) -> Result<()>;
}

/// Built-in checks on magic numbers and leading records
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureValidator;

#[async_trait]
impl FormatValidator for SignatureValidator {
    async fn check(&self, format: &FileFormat, path: &Path) -> Result<()> {
        let format = format.clone();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || sniff(&format, &path))
            .await
            .map_err(|e| IngestError::row(format!("Format check aborted: {}", e)))?
    }
}

/// External validator, run as `<command...> <format> <path>`; a non-zero
/// exit fails the file with whatever it printed on stderr.
#[derive(Debug, Clone)]
pub struct CommandValidator {
    program: String,
    args: Vec<String>,
}

impl CommandValidator {
    pub fn new(command: &str) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| IngestError::config("Format validator command is empty"))?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }
}

#[async_trait]
impl FormatValidator for CommandValidator {
    async fn check(&self, format: &FileFormat, path: &Path) -> Result<()> {
        let output = tokio::process::Command::new(&self.program)
            .args(&self.args)
            .arg(format.name())
            .arg(path)
            .output()
            .await?;

        if output.status.success() {
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let reason = stderr.trim();
        Err(IngestError::row(if reason.is_empty() {
            format!("{} validator exited with {}", format, output.status)
        } else {
            format!("{} validator: {}", format, reason)
        }))
    }
}

/// A `.gz` name must hold gzip data.
pub fn check_gzip_suffix(path: &Path, submit_file_name: &str) -> Result<()> {
    if !submit_file_name.ends_with(".gz") {
        return Ok(());
    }

    let mut magic = [0u8; 2];
    let mut file = std::fs::File::open(path)?;
    let read = file.read(&mut magic)?;
    if read < 2 || magic != GZIP_MAGIC {
        return Err(IngestError::row(format!(
            "{} has .gz suffix, but is not gzipped",
            submit_file_name
        )));
    }
    Ok(())
}

fn sniff(format: &FileFormat, path: &Path) -> Result<()> {
    let head = read_head(path)?;
    debug!(format = %format, path = %path.display(), bytes = head.len(), "Sniffing format");

    if head.is_empty() {
        return if format.family().allows_empty() {
            Ok(())
        } else {
            Err(fail(format, "file is empty"))
        };
    }

    match format.family() {
        FormatFamily::Unknown => Ok(()),
        FormatFamily::Bam => check_bam(format, path),
        FormatFamily::BigWig => check_magic(format, &head, BIGWIG_MAGIC),
        FormatFamily::BigBed => check_magic(format, &head, BIGBED_MAGIC),
        FormatFamily::TwoBit => check_magic(format, &head, TWOBIT_MAGIC),
        FormatFamily::Idat => {
            if head.starts_with(b"IDAT") {
                Ok(())
            } else {
                Err(fail(format, "missing IDAT signature"))
            }
        },
        FormatFamily::Fastq => check_fastq(format, &text_lines(format, &head)?),
        FormatFamily::BedText => check_bed(format, &text_lines(format, &head)?),
        FormatFamily::Gtf => check_gtf(format, &text_lines(format, &head)?),
        FormatFamily::Fasta => {
            let lines = text_lines(format, &head)?;
            match lines.iter().find(|l| !l.trim().is_empty()) {
                Some(first) if first.starts_with('>') => Ok(()),
                Some(_) => Err(fail(format, "first record does not start with '>'")),
                None => Ok(()),
            }
        },
        FormatFamily::Rcc => {
            let lines = text_lines(format, &head)?;
            if lines.iter().any(|l| l.trim() == "<Header>") {
                Ok(())
            } else {
                Err(fail(format, "no <Header> section"))
            }
        },
        FormatFamily::CustomTrack => text_lines(format, &head).map(|_| ()),
    }
}

fn fail(format: &FileFormat, reason: &str) -> IngestError {
    IngestError::row(format!("Not a valid {} file: {}", format, reason))
}

/// First [`SNIFF_BYTES`] of content, transparently un-gzipped.
fn read_head(path: &Path) -> Result<Vec<u8>> {
    let mut file = std::fs::File::open(path)?;
    let mut magic = [0u8; 2];
    let gzipped = file.read(&mut magic)? == 2 && magic == GZIP_MAGIC;
    drop(file);

    let file = std::fs::File::open(path)?;
    let mut head = Vec::new();
    if gzipped {
        MultiGzDecoder::new(file).take(SNIFF_BYTES).read_to_end(&mut head)?;
    } else {
        file.take(SNIFF_BYTES).read_to_end(&mut head)?;
    }
    Ok(head)
}

/// Whole lines of the sniffed head; a trailing partial line is dropped
/// unless the head is the whole file.
fn text_lines(format: &FileFormat, head: &[u8]) -> Result<Vec<String>> {
    let complete = if head.len() as u64 >= SNIFF_BYTES {
        match head.iter().rposition(|b| *b == b'\n') {
            Some(end) => &head[..end],
            None => head,
        }
    } else {
        head
    };

    let text = std::str::from_utf8(complete).map_err(|_| fail(format, "not UTF-8 text"))?;
    Ok(text.lines().map(|l| l.trim_end_matches('\r').to_string()).collect())
}

fn check_magic(format: &FileFormat, head: &[u8], magic: u32) -> Result<()> {
    let Some(first) = head.get(..4) else {
        return Err(fail(format, "too short for a signature"));
    };
    let word = [first[0], first[1], first[2], first[3]];
    if u32::from_le_bytes(word) == magic || u32::from_be_bytes(word) == magic {
        Ok(())
    } else {
        Err(fail(format, "bad magic number"))
    }
}

fn check_bam(format: &FileFormat, path: &Path) -> Result<()> {
    let mut raw = [0u8; 2];
    let mut file = std::fs::File::open(path)?;
    if file.read(&mut raw)? < 2 || raw != GZIP_MAGIC {
        return Err(fail(format, "not BGZF compressed"));
    }

    let mut magic = [0u8; 4];
    MultiGzDecoder::new(std::fs::File::open(path)?)
        .read_exact(&mut magic)
        .map_err(|_| fail(format, "truncated header"))?;
    if &magic == b"BAM\x01" {
        Ok(())
    } else {
        Err(fail(format, "missing BAM header"))
    }
}

fn check_fastq(format: &FileFormat, lines: &[String]) -> Result<()> {
    let record: Vec<&String> = lines.iter().filter(|l| !l.is_empty()).take(4).collect();
    if record.is_empty() {
        return Ok(());
    }
    if record.len() < 4 {
        return Err(fail(format, "first record is incomplete"));
    }
    if !record[0].starts_with('@') {
        return Err(fail(format, "record does not start with '@'"));
    }
    if !record[2].starts_with('+') {
        return Err(fail(format, "missing '+' separator line"));
    }
    if record[1].len() != record[3].len() {
        return Err(fail(format, "sequence and quality lengths differ"));
    }
    Ok(())
}

fn data_lines(lines: &[String]) -> impl Iterator<Item = (usize, &String)> {
    lines.iter().enumerate().filter(|(_, l)| {
        !l.trim().is_empty()
            && !l.starts_with('#')
            && !l.starts_with("track")
            && !l.starts_with("browser")
    })
}

fn check_bed(format: &FileFormat, lines: &[String]) -> Result<()> {
    for (ix, line) in data_lines(lines) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < 3 {
            return Err(fail(format, &format!("line {} has fewer than 3 columns", ix + 1)));
        }
        let start: u64 = fields[1]
            .parse()
            .map_err(|_| fail(format, &format!("line {} start is not a number", ix + 1)))?;
        let end: u64 = fields[2]
            .parse()
            .map_err(|_| fail(format, &format!("line {} end is not a number", ix + 1)))?;
        if start > end {
            return Err(fail(format, &format!("line {} starts after it ends", ix + 1)));
        }
    }
    Ok(())
}

fn check_gtf(format: &FileFormat, lines: &[String]) -> Result<()> {
    for (ix, line) in data_lines(lines) {
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() != 9 {
            return Err(fail(format, &format!("line {} does not have 9 columns", ix + 1)));
        }
        let attributes = fields[8];
        if !attributes.contains("gene_id") || !attributes.contains("transcript_id") {
            return Err(fail(
                format,
                &format!("line {} lacks gene_id or transcript_id", ix + 1),
            ));
        }
    }
    Ok(())
}

/// Validator selected by configuration
pub fn validator_for(command: Option<&str>) -> Result<Box<dyn FormatValidator>> {
    match command {
        Some(command) => Ok(Box::new(CommandValidator::new(command)?)),
        None => Ok(Box::new(SignatureValidator)),
    }
}
