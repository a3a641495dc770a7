use serde::{Serialize, de::DeserializeOwned};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use crate::error::Result;

pub trait JSONReadWrite {
    fn read_json(path: impl AsRef<Path>) -> Result<Self>
    where
        Self: Sized;

    fn write_json(&self, path: impl AsRef<Path>) -> Result<()>
    where
        Self: Serialize;
}

impl<I> JSONReadWrite for I
where
    I: DeserializeOwned,
{
    fn read_json(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let result = serde_json::from_reader(reader)?;
        Ok(result)
    }

    fn write_json(&self, path: impl AsRef<Path>) -> Result<()>
    where
        Self: Serialize,
    {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, self)?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::Error, permutation::Permutation};

    #[test]
    fn writes_and_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("perm.json");

        let perm = Permutation::from_vec(vec![2, 0, 1]).unwrap();
        perm.write_json(&path).unwrap();
        assert_eq!(Permutation::read_json(&path).unwrap(), perm);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            Permutation::read_json(dir.path().join("nope.json")),
            Err(Error::Io(_))
        ));
    }
}
