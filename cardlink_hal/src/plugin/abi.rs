//! C entry points exported by plugin modules.
//!
//! A plugin module is a `cdylib` exporting `extern "C"` functions named
//! after the objects it can create:
//!
//! | Symbol                     | Signature                                   |
//! |----------------------------|---------------------------------------------|
//! | `getLibraryName`           | `fn() -> *const c_char` (required marker)   |
//! | `getPluginAbiVersion`      | `fn() -> u32` (optional)                    |
//! | `get<Type>Reader`          | `fn() -> *mut c_void`                       |
//! | `get<Type>Chip`            | `fn() -> *mut c_void`                       |
//! | `get<Type>Commands`        | `fn() -> *mut c_void`                       |
//! | `get<Type>Diversification` | `fn() -> *mut c_void`                       |
//! | `getReaderInfoAt`          | `fn(u32, *mut c_char, usize) -> bool`       |
//! | `getChipInfoAt`            | `fn(u32, *mut c_char, usize) -> bool`       |
//!
//! Object factories hand over ownership of a `Box<Box<dyn Trait>>` turned
//! into a raw pointer with [`export_object`]. Host and plugin must be built
//! with the same toolchain and the same `cardlink_hal` version; the ABI
//! version number guards the latter.

use std::ffi::{c_char, c_void};

/// `getLibraryName` marker symbol.
pub const LIBRARY_NAME_SYMBOL: &str = "getLibraryName";
/// `getPluginAbiVersion` symbol.
pub const ABI_VERSION_SYMBOL: &str = "getPluginAbiVersion";
/// Reader type enumerator symbol.
pub const READER_INFO_SYMBOL: &str = "getReaderInfoAt";
/// Chip type enumerator symbol.
pub const CHIP_INFO_SYMBOL: &str = "getChipInfoAt";

/// Signature of `getLibraryName`.
pub type LibraryNameFn = unsafe extern "C" fn() -> *const c_char;
/// Signature of `getPluginAbiVersion`.
pub type AbiVersionFn = unsafe extern "C" fn() -> u32;
/// Signature of every object factory.
pub type ObjectFactoryFn = unsafe extern "C" fn() -> *mut c_void;
/// Signature of `getReaderInfoAt` / `getChipInfoAt`.
pub type ObjectInfoAtFn = unsafe extern "C" fn(u32, *mut c_char, usize) -> bool;

/// Factory symbol of a reader provider type.
pub fn reader_symbol(reader_type: &str) -> String {
    format!("get{reader_type}Reader")
}

/// Factory symbol of a chip type.
pub fn chip_symbol(chip_type: &str) -> String {
    format!("get{chip_type}Chip")
}

/// Factory symbol of a commands type.
pub fn commands_symbol(commands_type: &str) -> String {
    format!("get{commands_type}Commands")
}

/// Factory symbol of a key diversification type.
pub fn diversification_symbol(diversification_type: &str) -> String {
    format!("get{diversification_type}Diversification")
}

/// Hand an object over the module boundary.
///
/// The returned pointer owns the object until passed to [`import_object`].
pub fn export_object<T: ?Sized>(object: Box<T>) -> *mut c_void {
    Box::into_raw(Box::new(object)).cast::<c_void>()
}

/// Take back ownership of an object produced by [`export_object`].
///
/// Returns `None` for a null pointer.
///
/// # Safety
///
/// `ptr` must be null or come from `export_object::<T>` with the exact same
/// `T`, built by the same compiler, and must not be imported twice.
pub unsafe fn import_object<T: ?Sized>(ptr: *mut c_void) -> Option<Box<T>> {
    if ptr.is_null() {
        return None;
    }
    // SAFETY: caller guarantees ptr is a leaked Box<Box<T>>.
    let outer = unsafe { Box::from_raw(ptr.cast::<Box<T>>()) };
    Some(*outer)
}

/// Write `name` as a nul-terminated string into a caller buffer.
///
/// Returns false if the buffer is null or too small.
///
/// # Safety
///
/// `buf` must be null or valid for `len` bytes of writes.
pub unsafe fn write_object_name(name: &str, buf: *mut c_char, len: usize) -> bool {
    let bytes = name.as_bytes();
    if buf.is_null() || bytes.len() >= len || bytes.contains(&0) {
        return false;
    }
    // SAFETY: buf is valid for len > bytes.len() bytes per the caller contract.
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf.cast::<u8>(), bytes.len());
        *buf.add(bytes.len()) = 0;
    }
    true
}
