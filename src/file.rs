//! Encapsulates plaintext and gzip-compressed file input and output.
//!
//! The [`InputFile`] and [`OutputFile`] abstractions are for working with
//! possibly gzip-compressed map and table files. Output is staged in a
//! temporary file next to the destination and only renamed into place once
//! everything has been written, so a failed run leaves no partial files.
//!
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, BufWriter, ErrorKind, Write};
use std::io::{BufRead, BufReader, Read};
use std::path::Path;
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileError {
    #[error("IO error: {0}")]
    IOError(#[from] io::Error),
    #[error("Could not move finished output into place at '{0}': {1}")]
    PersistError(String, io::Error),
}

/// Check if a file is a gzipped by looking for the magic numbers.
///
/// Files shorter than the magic number are treated as plaintext.
fn is_gzipped_file(file_path: &str) -> io::Result<bool> {
    let mut file = File::open(file_path)?;
    let mut buffer = [0; 2];
    match file.read_exact(&mut buffer) {
        Ok(()) => Ok(buffer == [0x1f, 0x8b]),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Represents an input file.
///
/// This abstracts how data is read in, allowing for both plaintext and
/// gzip-compressed input to be read through a common interface.
pub struct InputFile {
    pub filepath: String,
}

impl InputFile {
    /// Constructs a new `InputFile`. Compression is detected from the file
    /// contents, not the extension.
    pub fn new(filepath: &str) -> Self {
        Self {
            filepath: filepath.to_string(),
        }
    }

    /// Opens the file and returns a buffered reader, decompressing on the fly
    /// when the file starts with the gzip magic number.
    pub fn reader(&self) -> Result<BufReader<Box<dyn Read>>, FileError> {
        let file = File::open(&self.filepath)?;
        let is_gzipped = is_gzipped_file(&self.filepath)?;
        let reader: Box<dyn Read> = if is_gzipped {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Ok(BufReader::new(reader))
    }

    /// Checks if the first line of the file starts with the expected header.
    pub fn has_header(&self, expect: &str) -> Result<bool, FileError> {
        let mut buf_reader = self.reader()?;
        let mut first_line = String::new();
        buf_reader.read_line(&mut first_line)?;
        Ok(first_line.starts_with(expect))
    }
}

/// Represents an output file.
///
/// This abstracts writing both plaintext and gzip-compressed files.
pub struct OutputFile {
    pub filepath: String,
    pub header: Option<Vec<String>>,
}

impl OutputFile {
    /// Constructs a new `OutputFile`.
    ///
    /// # Arguments
    ///
    /// * `filepath` - The destination path. If the file extension is `.gz`,
    ///   `OutputFile` will write gzip-compressed output.
    /// * `header` - Optional commented header lines (prefixed with `#`).
    pub fn new(filepath: &str, header: Option<Vec<String>>) -> Self {
        Self {
            filepath: filepath.to_string(),
            header,
        }
    }

    fn write_header(&self, writer: &mut dyn Write) -> io::Result<()> {
        if let Some(entries) = &self.header {
            for entry in entries {
                writeln!(writer, "#{}", entry)?;
            }
        }
        Ok(())
    }

    /// Write the file through `body`.
    ///
    /// The content goes to a temporary file in the destination directory,
    /// which replaces `filepath` only if `body` and all flushing succeed. On
    /// any error the temporary file is removed and the destination is left
    /// untouched.
    pub fn write_with<F, E>(&self, body: F) -> Result<(), E>
    where
        F: FnOnce(&mut dyn Write) -> Result<(), E>,
        E: From<io::Error> + From<FileError>,
    {
        let path = Path::new(&self.filepath);
        let mut tmp = NamedTempFile::new_in(self.staging_dir())?;
        {
            let buffered = BufWriter::new(tmp.as_file_mut());
            if self.filepath.ends_with(".gz") {
                let mut encoder = GzEncoder::new(buffered, Compression::default());
                self.write_header(&mut encoder)?;
                body(&mut encoder)?;
                encoder.finish()?.flush()?;
            } else {
                let mut buffered = buffered;
                self.write_header(&mut buffered)?;
                body(&mut buffered)?;
                buffered.flush()?;
            }
        }
        tmp.persist(path)
            .map_err(|e| FileError::PersistError(self.filepath.clone(), e.error))?;
        Ok(())
    }

    /// Like [`OutputFile::write_with`], for writers that open the file by
    /// name. `body` gets the path of the staged file; headers and
    /// compression are left to it.
    pub fn write_to_path<F, E>(&self, body: F) -> Result<(), E>
    where
        F: FnOnce(&str) -> Result<(), E>,
        E: From<io::Error> + From<FileError>,
    {
        let tmp = NamedTempFile::new_in(self.staging_dir())?;
        let staged = tmp
            .path()
            .to_str()
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidInput, "output path is not UTF-8"))?
            .to_string();
        body(&staged)?;
        tmp.persist(Path::new(&self.filepath))
            .map_err(|e| FileError::PersistError(self.filepath.clone(), e.error))?;
        Ok(())
    }

    fn staging_dir(&self) -> &Path {
        match Path::new(&self.filepath).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        }
    }
}
