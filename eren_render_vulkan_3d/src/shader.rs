use std::{
    fs,
    io::{self, Cursor},
    path::{Path, PathBuf},
};

use thiserror::Error;

pub const SPIRV_MAGIC: u32 = 0x0723_0203;
pub const SHADER_DIR: &str = "Shaders";

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("Failed to read shader `{}`: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Shader `{}` is {len} bytes, not a whole number of SPIR-V words", path.display())]
    Misaligned { path: PathBuf, len: usize },

    #[error("Shader `{}` is not SPIR-V (magic {magic:#010x})", path.display())]
    BadMagic { path: PathBuf, magic: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn extension(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vert",
            ShaderStage::Fragment => "frag",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ShaderPair {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

/// Loads precompiled SPIR-V from `<root>/Shaders/<name>.<stage>.spv`.
#[derive(Debug, Clone)]
pub struct ShaderLibrary {
    root: PathBuf,
}

impl ShaderLibrary {
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        Self {
            root: project_root.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path(&self, name: &str, stage: ShaderStage) -> PathBuf {
        self.root
            .join(SHADER_DIR)
            .join(format!("{name}.{}.spv", stage.extension()))
    }

    pub fn load(&self, name: &str, stage: ShaderStage) -> Result<Vec<u32>, ShaderError> {
        let path = self.path(name, stage);
        let bytes = fs::read(&path).map_err(|source| ShaderError::Read {
            path: path.clone(),
            source,
        })?;
        let words = decode_spirv(&path, &bytes)?;
        log::debug!("Loaded shader {} ({} words)", path.display(), words.len());
        Ok(words)
    }

    pub fn load_pair(&self, name: &str) -> Result<ShaderPair, ShaderError> {
        Ok(ShaderPair {
            vertex: self.load(name, ShaderStage::Vertex)?,
            fragment: self.load(name, ShaderStage::Fragment)?,
        })
    }
}

fn decode_spirv(path: &Path, bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    let misaligned = || ShaderError::Misaligned {
        path: path.to_path_buf(),
        len: bytes.len(),
    };

    // read_spv also byte-swaps modules written on big-endian hosts.
    let words = ash::util::read_spv(&mut Cursor::new(bytes)).map_err(|_| misaligned())?;
    match words.first() {
        None => Err(misaligned()),
        Some(&magic) if magic != SPIRV_MAGIC => Err(ShaderError::BadMagic {
            path: path.to_path_buf(),
            magic,
        }),
        Some(_) => Ok(words),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_shader(root: &Path, file: &str, bytes: &[u8]) {
        let dir = root.join(SHADER_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(file), bytes).unwrap();
    }

    fn module(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn loads_both_stages_by_convention() {
        let root = tempfile::tempdir().unwrap();
        write_shader(root.path(), "gbuffer.vert.spv", &module(&[SPIRV_MAGIC, 1]));
        write_shader(root.path(), "gbuffer.frag.spv", &module(&[SPIRV_MAGIC, 2, 3]));

        let library = ShaderLibrary::new(root.path());
        let pair = library.load_pair("gbuffer").unwrap();

        assert_eq!(pair.vertex, vec![SPIRV_MAGIC, 1]);
        assert_eq!(pair.fragment, vec![SPIRV_MAGIC, 2, 3]);
        assert_eq!(
            library.path("gbuffer", ShaderStage::Fragment),
            root.path().join("Shaders").join("gbuffer.frag.spv")
        );
    }

    #[test]
    fn accepts_byte_swapped_modules() {
        let root = tempfile::tempdir().unwrap();
        let swapped: Vec<u8> = [SPIRV_MAGIC, 7].iter().flat_map(|w| w.to_be_bytes()).collect();
        write_shader(root.path(), "swapped.frag.spv", &swapped);

        let words = ShaderLibrary::new(root.path())
            .load("swapped", ShaderStage::Fragment)
            .unwrap();

        assert_eq!(words, vec![SPIRV_MAGIC, 7]);
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let root = tempfile::tempdir().unwrap();
        let err = ShaderLibrary::new(root.path())
            .load("lighting", ShaderStage::Vertex)
            .unwrap_err();

        assert!(matches!(
            err,
            ShaderError::Read { ref path, .. } if path.ends_with("lighting.vert.spv")
        ));
    }

    #[test]
    fn rejects_truncated_and_foreign_files() {
        let root = tempfile::tempdir().unwrap();
        write_shader(root.path(), "odd.vert.spv", &[0x03, 0x02, 0x23]);
        write_shader(root.path(), "empty.vert.spv", &[]);
        write_shader(root.path(), "glsl.vert.spv", b"#version 450\n\0\0\0");

        let library = ShaderLibrary::new(root.path());
        assert!(matches!(
            library.load("odd", ShaderStage::Vertex),
            Err(ShaderError::Misaligned { len: 3, .. })
        ));
        assert!(matches!(
            library.load("empty", ShaderStage::Vertex),
            Err(ShaderError::Misaligned { len: 0, .. })
        ));
        assert!(matches!(
            library.load("glsl", ShaderStage::Vertex),
            Err(ShaderError::BadMagic { .. })
        ));
    }
}
