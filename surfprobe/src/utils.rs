use std::borrow::Cow;
use std::fs::{self, create_dir_all, File};
use std::io::{self, ErrorKind};
use std::path::Path;

pub fn ensure_dir_exists(p: &Path) -> io::Result<()> {
    if p.exists() {
        return Ok(());
    }

    create_dir_all(p)
}

pub fn path_has_ext<P: AsRef<Path> + ?Sized>(p: &P, ext: &str) -> bool {
    p.as_ref()
        .extension()
        .map_or(false, |it| it.eq_ignore_ascii_case(ext))
}

/// Lossy string form of a path for logs and error messages
pub fn path_str(path: &Path) -> Cow<'_, str> {
    path.to_string_lossy()
}

pub fn open_file(path: &Path) -> crate::Result<File> {
    match File::open(path) {
        Ok(v) => Ok(v),
        Err(e) => match e.kind() {
            ErrorKind::NotFound => Err(crate::Error::MissingFile(path_str(path).into_owned())),
            _ => Err(e.into()),
        },
    }
}

pub fn read_file(path: &Path) -> crate::Result<String> {
    match fs::read_to_string(path) {
        Ok(v) => Ok(v),
        Err(e) => match e.kind() {
            ErrorKind::NotFound => Err(crate::Error::MissingFile(path_str(path).into_owned())),
            _ => Err(e.into()),
        },
    }
}
