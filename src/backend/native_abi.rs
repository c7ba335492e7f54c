//! Native UDF module ABI, version 1.
//!
//! A compiled C++ UDF exports four symbols:
//!
//! - `dynamic_dataset`: `extern "C" void dynamic_dataset(void)`, the entry point
//! - `hdf5_udf_data`: [`DataTable`], grid pointers
//! - `hdf5_udf_names`: [`NameTable`], dataset names
//! - `hdf5_udf_shapes`: [`ShapeTable`], type, cast and dimensions
//!
//! The three tables are parallel and follow dataset-table order: the output at
//! index 0, inputs after it. The module initializes `hdf5_udf_data.abi_version`
//! to [`ABI_VERSION`]; the host fills in everything else before invoking the
//! entry point. `templates/udf_template.cpp` holds the matching C declarations.
//!
//! Loading walks a type-state chain so a module cannot be invoked before its
//! symbols are resolved and populated:
//! `OnDisk -> Loaded -> Resolved -> Populated -> invoke`.

use crate::compile::{Artifact, Workspace};
use crate::config::types::{Result, UdfError};
use crate::dataset::{DatasetTable, TableEntry};
use libloading::os::unix::{Library, RTLD_LOCAL, RTLD_NOW};
use std::ffi::{c_char, c_void, CString};
use std::path::PathBuf;

pub const ABI_VERSION: u32 = 1;
pub const MAX_DATASETS: usize = 64;
pub const MAX_RANK: usize = 8;

pub const ENTRY_SYMBOL: &[u8] = b"dynamic_dataset\0";
pub const DATA_SYMBOL: &[u8] = b"hdf5_udf_data\0";
pub const NAMES_SYMBOL: &[u8] = b"hdf5_udf_names\0";
pub const SHAPES_SYMBOL: &[u8] = b"hdf5_udf_shapes\0";

#[repr(C)]
pub struct DataTable {
    pub abi_version: u32,
    pub len: u32,
    pub items: [*mut c_void; MAX_DATASETS],
}

#[repr(C)]
pub struct NameTable {
    pub len: u32,
    pub items: [*const c_char; MAX_DATASETS],
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct ShapeSlot {
    pub type_name: *const c_char,
    pub cast_name: *const c_char,
    pub rank: u32,
    pub dims: [u64; MAX_RANK],
}

#[repr(C)]
pub struct ShapeTable {
    pub len: u32,
    pub items: [ShapeSlot; MAX_DATASETS],
}

type EntryPoint = unsafe extern "C" fn();

/// Artifact written to a workspace file, not yet loaded
pub struct OnDisk {
    path: PathBuf,
}

/// Shared object mapped with `RTLD_NOW`
pub struct Loaded {
    library: Library,
}

/// Entry point and tables located
pub struct Resolved {
    library: Library,
    entry: EntryPoint,
    data: *mut DataTable,
    names: *mut NameTable,
    shapes: *mut ShapeTable,
}

/// Tables filled in; owns the strings the tables point at
pub struct Populated {
    _library: Library,
    entry: EntryPoint,
    _strings: Vec<CString>,
}

pub struct NativeModule<S> {
    state: S,
}

impl NativeModule<OnDisk> {
    /// Write `artifact` into `workspace` as an executable shared object.
    pub fn write(workspace: &mut Workspace, artifact: &Artifact) -> Result<Self> {
        let path = workspace.write_file("udf.so", artifact.as_bytes())?;
        workspace.set_mode(&path, 0o755)?;
        Ok(Self {
            state: OnDisk { path },
        })
    }

    pub fn load(self) -> Result<NativeModule<Loaded>> {
        let path = &self.state.path;
        // SAFETY: loading runs the module's static initializers; the artifact is
        // trusted to the same degree as the entry point we are about to call.
        let library = unsafe { Library::open(Some(path), RTLD_NOW | RTLD_LOCAL) }
            .map_err(|e| UdfError::Load(format!("Failed to load {}: {}", path.display(), e)))?;
        Ok(NativeModule {
            state: Loaded { library },
        })
    }
}

impl NativeModule<Loaded> {
    /// Resolve all four symbols; any miss fails before anything is written.
    pub fn resolve(self) -> Result<NativeModule<Resolved>> {
        let library = self.state.library;
        let missing = |symbol: &[u8], e: libloading::Error| {
            UdfError::Load(format!(
                "symbol {} not found: {}",
                String::from_utf8_lossy(&symbol[..symbol.len() - 1]),
                e
            ))
        };

        // SAFETY: the symbol types match ABI version 1; the version field is
        // checked before any table is written.
        let (entry, data, names, shapes) = unsafe {
            let entry = *library
                .get::<EntryPoint>(ENTRY_SYMBOL)
                .map_err(|e| missing(ENTRY_SYMBOL, e))?;
            let data = *library
                .get::<*mut DataTable>(DATA_SYMBOL)
                .map_err(|e| missing(DATA_SYMBOL, e))?;
            let names = *library
                .get::<*mut NameTable>(NAMES_SYMBOL)
                .map_err(|e| missing(NAMES_SYMBOL, e))?;
            let shapes = *library
                .get::<*mut ShapeTable>(SHAPES_SYMBOL)
                .map_err(|e| missing(SHAPES_SYMBOL, e))?;
            (entry, data, names, shapes)
        };

        Ok(NativeModule {
            state: Resolved {
                library,
                entry,
                data,
                names,
                shapes,
            },
        })
    }
}

impl NativeModule<Resolved> {
    /// Copy the dataset table into the module's exported tables.
    pub fn populate(self, table: &DatasetTable) -> Result<NativeModule<Populated>> {
        let Resolved {
            library,
            entry,
            data,
            names,
            shapes,
        } = self.state;

        // SAFETY: `data` points at the module's exported DataTable, which lives
        // as long as `library`.
        let version = unsafe { (*data).abi_version };
        if version != ABI_VERSION {
            return Err(UdfError::Load(format!(
                "module ABI version {} does not match host version {}",
                version, ABI_VERSION
            )));
        }

        let entries: Vec<&TableEntry> = table.datasets().collect();
        if entries.len() > MAX_DATASETS {
            return Err(UdfError::Dataset(format!(
                "{} datasets exceed the native limit of {}",
                entries.len(),
                MAX_DATASETS
            )));
        }

        let mut strings = Vec::with_capacity(entries.len() * 3);
        let mut slots = Vec::with_capacity(entries.len());
        let mut name_ptrs = Vec::with_capacity(entries.len());
        for entry in &entries {
            if entry.dims.len() > MAX_RANK {
                return Err(UdfError::Dataset(format!(
                    "dataset {} has rank {}, the native limit is {}",
                    entry.name,
                    entry.dims.len(),
                    MAX_RANK
                )));
            }
            let name = c_string(&entry.name)?;
            let type_name = c_string(entry.type_name())?;
            let cast_name = c_string(&entry.cast)?;

            let mut dims = [0u64; MAX_RANK];
            dims[..entry.dims.len()].copy_from_slice(&entry.dims);
            name_ptrs.push(name.as_ptr());
            slots.push(ShapeSlot {
                type_name: type_name.as_ptr(),
                cast_name: cast_name.as_ptr(),
                rank: entry.dims.len() as u32,
                dims,
            });
            strings.extend([name, type_name, cast_name]);
        }

        // SAFETY: the three tables are exported by the module, sized by the ABI,
        // and nothing else references them while we write.
        unsafe {
            let len = entries.len() as u32;
            (*data).len = len;
            (*names).len = len;
            (*shapes).len = len;
            for (i, entry) in entries.iter().enumerate() {
                (*data).items[i] = entry.data.cast();
                (*names).items[i] = name_ptrs[i];
                (*shapes).items[i] = slots[i];
            }
        }

        Ok(NativeModule {
            state: Populated {
                _library: library,
                entry,
                _strings: strings,
            },
        })
    }
}

impl NativeModule<Populated> {
    /// Call `dynamic_dataset`.
    ///
    /// # Safety
    ///
    /// Runs arbitrary native code with the caller's privileges. A fault in the
    /// UDF is a fault in the calling process.
    pub unsafe fn invoke(self) {
        (self.state.entry)();
    }
}

fn c_string(text: &str) -> Result<CString> {
    CString::new(text)
        .map_err(|_| UdfError::Dataset(format!("{text:?} contains an interior NUL byte")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::{offset_of, size_of};

    #[test]
    fn layout_matches_the_c_declarations() {
        assert_eq!(offset_of!(DataTable, items), 8);
        assert_eq!(size_of::<DataTable>(), 8 + 8 * MAX_DATASETS);
        assert_eq!(offset_of!(NameTable, items), 8);
        assert_eq!(offset_of!(ShapeSlot, rank), 16);
        assert_eq!(offset_of!(ShapeSlot, dims), 24);
        assert_eq!(size_of::<ShapeSlot>(), 24 + 8 * MAX_RANK);
        assert_eq!(offset_of!(ShapeTable, items), 8);
    }

    #[test]
    fn written_module_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let root = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::new(root.path()).unwrap();
        let module =
            NativeModule::write(&mut workspace, &Artifact::new(b"not an elf".to_vec())).unwrap();
        let mode = std::fs::metadata(&module.state.path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);

        assert!(matches!(module.load(), Err(UdfError::Load(_))));
    }
}
