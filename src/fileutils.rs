use std::fs::{File, OpenOptions};
use std::io::Seek;
use std::path::{Path, PathBuf};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn open_file_overwrite_rw<P: AsRef<Path>>(path: P) -> Result<File, std::io::Error> {
    let mut file = OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(path)?;
    file.set_len(0)?;
    file.seek(std::io::SeekFrom::Start(0))?;
    Ok(file)
}

/// Expands a glob of input files into `(input, output)` pairs, where each
/// output lands in `output_folder` with `out_ext` appended to the file
/// stem. Entries that are not regular files with the expected extension
/// are announced and dropped.
pub fn get_input_output_pairs(
    input_glob: &str,
    source_ext: &str,
    output_folder: &Path,
    out_ext: &str,
) -> Vec<(PathBuf, PathBuf)> {
    glob::glob(input_glob)
        .expect("Failed to read glob pattern")
        .filter_map(|entry| {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    println!("{:?}", e);
                    return None;
                }
            };
            if !valid_file_of_type(&path, source_ext) {
                println!("Skipping {}!", path.display());
                return None;
            }
            let file_name = path.file_name()?;
            let mut output_path = output_folder.join(file_name);
            output_path.set_extension(out_ext);
            Some((path, output_path))
        })
        .collect()
}

/// The explicit output folder when one was given (it must exist and be a
/// directory), the current directory otherwise.
pub fn get_final_output_folder(
    output_folder: &Option<PathBuf>,
) -> Result<PathBuf, Box<dyn std::error::Error>> {
    match output_folder {
        Some(folder) => {
            if std::fs::metadata(folder)?.is_dir() {
                Ok(folder.clone())
            } else {
                Err("Output path must be a folder!".into())
            }
        }
        None => Ok(std::env::current_dir()?),
    }
}

pub fn valid_file_of_type<P: AsRef<Path>>(path: P, ext: &str) -> bool {
    let Ok(metadata) = std::fs::metadata(&path) else {
        return false;
    };
    metadata.is_file()
        && path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}
