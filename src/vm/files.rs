// JBasic File Handles
// Per-session table of open files addressed by integer handle

use rustc_hash::FxHashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};

use crate::error::{ErrorKind, VmError, VmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileMode {
    Input,
    Output,
    Append,
    Binary,
}

impl FileMode {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(FileMode::Input),
            1 => Some(FileMode::Output),
            2 => Some(FileMode::Append),
            3 => Some(FileMode::Binary),
            _ => None,
        }
    }
}

enum FileHandle {
    Input(BufReader<File>),
    Output(BufWriter<File>),
    Binary(File),
}

fn file_error(message: impl Into<String>) -> VmError {
    VmError::with_param(ErrorKind::FileError, message)
}

fn io_error(err: std::io::Error) -> VmError {
    file_error(err.to_string())
}

#[derive(Default)]
pub struct FileTable {
    next: i64,
    files: FxHashMap<i64, FileHandle>,
}

impl FileTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, path: &str, mode: FileMode) -> VmResult<i64> {
        let opened = match mode {
            FileMode::Input => File::open(path).map(|f| FileHandle::Input(BufReader::new(f))),
            FileMode::Output => File::create(path).map(|f| FileHandle::Output(BufWriter::new(f))),
            FileMode::Append => OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map(|f| FileHandle::Output(BufWriter::new(f))),
            FileMode::Binary => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path)
                .map(FileHandle::Binary),
        };
        let handle = opened.map_err(|err| file_error(format!("{}: {}", path, err)))?;
        self.next += 1;
        self.files.insert(self.next, handle);
        Ok(self.next)
    }

    fn handle(&mut self, id: i64) -> VmResult<&mut FileHandle> {
        self.files
            .get_mut(&id)
            .ok_or_else(|| file_error(format!("handle {} is not open", id)))
    }

    pub fn close(&mut self, id: i64) -> VmResult<()> {
        match self.files.remove(&id) {
            Some(FileHandle::Output(mut writer)) => writer.flush().map_err(io_error),
            Some(_) => Ok(()),
            None => Err(file_error(format!("handle {} is not open", id))),
        }
    }

    pub fn close_all(&mut self) {
        for (_, handle) in self.files.drain() {
            if let FileHandle::Output(mut writer) = handle {
                let _ = writer.flush();
            }
        }
    }

    pub fn write_text(&mut self, id: i64, text: &str) -> VmResult<()> {
        match self.handle(id)? {
            FileHandle::Output(writer) => writer.write_all(text.as_bytes()).map_err(io_error),
            FileHandle::Binary(file) => file.write_all(text.as_bytes()).map_err(io_error),
            FileHandle::Input(_) => Err(file_error(format!("handle {} is open for input", id))),
        }
    }

    /// Next line without its terminator
    pub fn read_line(&mut self, id: i64) -> VmResult<String> {
        let FileHandle::Input(reader) = self.handle(id)? else {
            return Err(file_error(format!("handle {} is not open for input", id)));
        };
        let mut line = String::new();
        if reader.read_line(&mut line).map_err(io_error)? == 0 {
            return Err(VmError::new(ErrorKind::EndOfFile));
        }
        while line.ends_with(['\n', '\r']) {
            line.pop();
        }
        Ok(line)
    }

    pub fn at_eof(&mut self, id: i64) -> VmResult<bool> {
        match self.handle(id)? {
            FileHandle::Input(reader) => Ok(reader.fill_buf().map_err(io_error)?.is_empty()),
            FileHandle::Binary(file) => {
                let position = file.stream_position().map_err(io_error)?;
                let len = file.metadata().map_err(io_error)?.len();
                Ok(position >= len)
            }
            FileHandle::Output(_) => Ok(true),
        }
    }

    pub fn read_bytes(&mut self, id: i64, len: usize) -> VmResult<Vec<u8>> {
        let FileHandle::Binary(file) = self.handle(id)? else {
            return Err(file_error(format!("handle {} is not a binary file", id)));
        };
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer).map_err(|err| match err.kind() {
            std::io::ErrorKind::UnexpectedEof => VmError::new(ErrorKind::EndOfFile),
            _ => io_error(err),
        })?;
        Ok(buffer)
    }

    pub fn write_bytes(&mut self, id: i64, bytes: &[u8]) -> VmResult<()> {
        let FileHandle::Binary(file) = self.handle(id)? else {
            return Err(file_error(format!("handle {} is not a binary file", id)));
        };
        file.write_all(bytes).map_err(io_error)
    }

    pub fn seek(&mut self, id: i64, position: u64) -> VmResult<()> {
        let FileHandle::Binary(file) = self.handle(id)? else {
            return Err(file_error(format!("handle {} is not a binary file", id)));
        };
        file.seek(SeekFrom::Start(position)).map_err(io_error)?;
        Ok(())
    }

    pub fn open_count(&self) -> usize {
        self.files.len()
    }
}

impl Drop for FileTable {
    fn drop(&mut self) {
        self.close_all();
    }
}
