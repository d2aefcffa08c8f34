//! The assumed C ABI of the pre-built compiler library, and the
//! [`RawEngine`] adapter that drives an engine supplied as a table of
//! C entry points.
//!
//! Ownership rules mirror the usual C-bridge discipline: every string and
//! array crossing the boundary from Rust is produced with
//! `CString::into_raw` (or a leaked `Vec`) and reclaimed by exactly one
//! matching free call. Values returned from a callback trampoline are
//! owned by the engine, which releases them with [`sassette_free_value`]
//! or [`sassette_free_import_list`]. Strings pulled out of the engine's
//! context are borrowed and copied before `free_context` runs.

use std::ffi::{CStr, CString};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::Path;
use std::ptr;

use libc::{c_char, c_int, c_void};

use crate::engine::{
    Engine, EngineInput, EngineJob, EngineReport, ErrorPayload, FunctionEntry, ImportRecord,
    ImporterEntry, ImporterOutcome,
};
use crate::value::{ListSeparator, Value};

pub const RAW_NULL: c_int = 0;
pub const RAW_BOOLEAN: c_int = 1;
pub const RAW_NUMBER: c_int = 2;
pub const RAW_STRING: c_int = 3;
pub const RAW_LIST: c_int = 4;
pub const RAW_MAP: c_int = 5;
pub const RAW_ERROR: c_int = 6;

pub const RAW_SEPARATOR_COMMA: c_int = 0;
pub const RAW_SEPARATOR_SPACE: c_int = 1;

pub const RAW_INPUT_SOURCE: c_int = 0;
pub const RAW_INPUT_PATH: c_int = 1;

/// Tagged value record exchanged with custom-function callbacks.
///
/// Not a C union: the tag selects which fields are meaningful, the rest
/// stay zeroed. `items` carries list elements, or flattened key/value
/// pairs (2 × `len` entries) for `RAW_MAP`.
#[repr(C)]
#[derive(Debug)]
pub struct RawValue {
    pub tag: c_int,
    pub boolean: bool,
    pub number: f64,
    pub unit: *mut c_char,
    pub string: *mut c_char,
    pub items: *mut RawValue,
    pub len: usize,
    pub separator: c_int,
}

impl RawValue {
    fn null() -> Self {
        RawValue {
            tag: RAW_NULL,
            boolean: false,
            number: 0.0,
            unit: ptr::null_mut(),
            string: ptr::null_mut(),
            items: ptr::null_mut(),
            len: 0,
            separator: RAW_SEPARATOR_COMMA,
        }
    }
}

/// One resolved import in a callback's reply.
#[repr(C)]
#[derive(Debug)]
pub struct RawImportRecord {
    pub uri: *mut c_char,
    pub contents: *mut c_char,
    pub source_map: *mut c_char,
}

/// Importer reply: a null list pointer from the trampoline means
/// "not handled"; a non-null `error` means callback failure.
#[repr(C)]
#[derive(Debug)]
pub struct RawImportList {
    pub records: *mut RawImportRecord,
    pub len: usize,
    pub error: *mut c_char,
}

pub type RawImporterFn =
    unsafe extern "C" fn(url: *const c_char, prev: *const c_char, cookie: *mut c_void) -> *mut RawImportList;

pub type RawFunctionFn =
    unsafe extern "C" fn(argv: *const RawValue, argc: usize, cookie: *mut c_void) -> *mut RawValue;

/// The `make_importer(fn_ptr, priority, cookie)` shape. The cookie points
/// at the bridge-side entry and is valid for the duration of the compile
/// call that carries it.
#[repr(C)]
#[derive(Debug)]
pub struct RawImporterEntry {
    pub fn_ptr: RawImporterFn,
    pub priority: c_int,
    pub cookie: *mut c_void,
}

/// The `make_function(signature, fn_ptr, cookie)` shape.
#[repr(C)]
#[derive(Debug)]
pub struct RawFunctionEntry {
    pub signature: *const c_char,
    pub fn_ptr: RawFunctionFn,
    pub cookie: *mut c_void,
}

#[repr(C)]
#[derive(Debug)]
pub struct RawOptions {
    pub output_style: c_int,
    pub indent: *const c_char,
    pub linefeed: *const c_char,
    pub precision: c_int,
    pub indented_syntax: bool,
    pub source_comments: bool,
    pub omit_source_map_url: bool,
    pub source_map_embed: bool,
    pub source_map_contents: bool,
    pub include_paths: *const *const c_char,
    pub include_paths_len: usize,
    pub out_file: *const c_char,
    pub source_map_file: *const c_char,
    pub source_map_root: *const c_char,
}

#[repr(C)]
#[derive(Debug)]
pub struct RawJob {
    pub input_kind: c_int,
    pub source: *const c_char,
    pub input_path: *const c_char,
    pub options: RawOptions,
    pub importers: *const RawImporterEntry,
    pub importers_len: usize,
    pub functions: *const RawFunctionEntry,
    pub functions_len: usize,
}

/// Opaque per-compilation context owned by the engine.
pub type RawContext = c_void;

/// The entry-point table the external library exports.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawEngineApi {
    pub compile: unsafe extern "C" fn(job: *const RawJob) -> *mut RawContext,
    pub get_error_status: unsafe extern "C" fn(ctx: *const RawContext) -> c_int,
    pub get_output_text: unsafe extern "C" fn(ctx: *const RawContext) -> *const c_char,
    pub get_source_map_text: unsafe extern "C" fn(ctx: *const RawContext) -> *const c_char,
    /// Null-terminated array of transitively included file paths.
    pub get_included_files: unsafe extern "C" fn(ctx: *const RawContext) -> *const *const c_char,
    pub get_error_json: unsafe extern "C" fn(ctx: *const RawContext) -> *const c_char,
    pub free_context: unsafe extern "C" fn(ctx: *mut RawContext),
    pub version: unsafe extern "C" fn() -> *const c_char,
}

fn to_c_string(s: &str) -> *mut c_char {
    CString::new(s).map_or_else(|_| ptr::null_mut(), |cs| cs.into_raw())
}

unsafe fn c_str_to_string(s: *const c_char) -> String {
    if s.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(s) }.to_string_lossy().into_owned()
}

unsafe fn c_str_to_opt_string(s: *const c_char) -> Option<String> {
    if s.is_null() {
        None
    } else {
        Some(unsafe { c_str_to_string(s) })
    }
}

/// Converts a value into its owned raw form. Reclaim with
/// [`free_raw_value_contents`] (or hand it to the engine, which calls
/// [`sassette_free_value`]).
pub fn value_to_raw(value: &Value) -> RawValue {
    match value {
        Value::Null => RawValue::null(),
        Value::Boolean(b) => RawValue {
            tag: RAW_BOOLEAN,
            boolean: *b,
            ..RawValue::null()
        },
        Value::Number { value, unit } => RawValue {
            tag: RAW_NUMBER,
            number: *value,
            unit: to_c_string(unit),
            ..RawValue::null()
        },
        Value::String(s) => RawValue {
            tag: RAW_STRING,
            string: to_c_string(s),
            ..RawValue::null()
        },
        Value::List { items, separator } => {
            let raw_items: Vec<RawValue> = items.iter().map(value_to_raw).collect();
            let len = raw_items.len();
            RawValue {
                tag: RAW_LIST,
                items: leak_raw_values(raw_items),
                len,
                separator: match separator {
                    ListSeparator::Comma => RAW_SEPARATOR_COMMA,
                    ListSeparator::Space => RAW_SEPARATOR_SPACE,
                },
                ..RawValue::null()
            }
        }
        Value::Map(entries) => {
            let mut raw_items = Vec::with_capacity(entries.len() * 2);
            for (k, v) in entries {
                raw_items.push(value_to_raw(k));
                raw_items.push(value_to_raw(v));
            }
            let len = entries.len();
            RawValue {
                tag: RAW_MAP,
                items: leak_raw_values(raw_items),
                len,
                ..RawValue::null()
            }
        }
        Value::Error(message) => RawValue {
            tag: RAW_ERROR,
            string: to_c_string(message),
            ..RawValue::null()
        },
    }
}

fn leak_raw_values(values: Vec<RawValue>) -> *mut RawValue {
    if values.is_empty() {
        return ptr::null_mut();
    }
    let boxed = values.into_boxed_slice();
    Box::into_raw(boxed) as *mut RawValue
}

/// Reads a raw value back into its owned form without consuming it.
///
/// # Safety
///
/// `raw` must describe valid, initialized memory for its tag: non-null
/// `items` covering `len` elements (2 × `len` for maps) and valid C
/// strings wherever the pointers are non-null.
pub unsafe fn raw_to_value(raw: &RawValue) -> Value {
    match raw.tag {
        RAW_BOOLEAN => Value::Boolean(raw.boolean),
        RAW_NUMBER => Value::Number {
            value: raw.number,
            unit: unsafe { c_str_to_string(raw.unit) },
        },
        RAW_STRING => Value::String(unsafe { c_str_to_string(raw.string) }),
        RAW_LIST => {
            let items = if raw.items.is_null() {
                Vec::new()
            } else {
                unsafe { std::slice::from_raw_parts(raw.items, raw.len) }
                    .iter()
                    .map(|item| unsafe { raw_to_value(item) })
                    .collect()
            };
            Value::List {
                items,
                separator: if raw.separator == RAW_SEPARATOR_SPACE {
                    ListSeparator::Space
                } else {
                    ListSeparator::Comma
                },
            }
        }
        RAW_MAP => {
            let entries = if raw.items.is_null() {
                Vec::new()
            } else {
                unsafe { std::slice::from_raw_parts(raw.items, raw.len * 2) }
                    .chunks_exact(2)
                    .map(|pair| unsafe { (raw_to_value(&pair[0]), raw_to_value(&pair[1])) })
                    .collect()
            };
            Value::Map(entries)
        }
        RAW_ERROR => Value::Error(unsafe { c_str_to_string(raw.string) }),
        _ => Value::Null,
    }
}

/// Frees the heap allocations owned by a raw value, leaving the record
/// itself to its owner.
///
/// # Safety
///
/// Must be called at most once per record; the pointers must have been
/// produced by [`value_to_raw`].
pub unsafe fn free_raw_value_contents(raw: &mut RawValue) {
    if !raw.unit.is_null() {
        drop(unsafe { CString::from_raw(raw.unit) });
        raw.unit = ptr::null_mut();
    }
    if !raw.string.is_null() {
        drop(unsafe { CString::from_raw(raw.string) });
        raw.string = ptr::null_mut();
    }
    if !raw.items.is_null() {
        let count = if raw.tag == RAW_MAP { raw.len * 2 } else { raw.len };
        let mut items =
            unsafe { Box::from_raw(std::slice::from_raw_parts_mut(raw.items, count) as *mut [RawValue]) };
        for item in items.iter_mut() {
            unsafe { free_raw_value_contents(item) };
        }
        raw.items = ptr::null_mut();
        raw.len = 0;
    }
}

/// Releases a boxed value returned by a function trampoline. Exported for
/// the engine side of the boundary.
///
/// # Safety
///
/// `value` must come from a trampoline in this module and must not be used
/// afterwards.
pub unsafe extern "C" fn sassette_free_value(value: *mut RawValue) {
    if value.is_null() {
        return;
    }
    let mut boxed = unsafe { Box::from_raw(value) };
    unsafe { free_raw_value_contents(&mut boxed) };
}

fn import_records_to_raw(records: Vec<ImportRecord>) -> *mut RawImportList {
    let raw_records: Vec<RawImportRecord> = records
        .into_iter()
        .map(|record| RawImportRecord {
            uri: to_c_string(&record.uri),
            contents: record.contents.as_deref().map_or(ptr::null_mut(), to_c_string),
            source_map: record.source_map.as_deref().map_or(ptr::null_mut(), to_c_string),
        })
        .collect();
    let len = raw_records.len();
    let records_ptr = if len == 0 {
        ptr::null_mut()
    } else {
        Box::into_raw(raw_records.into_boxed_slice()) as *mut RawImportRecord
    };
    Box::into_raw(Box::new(RawImportList {
        records: records_ptr,
        len,
        error: ptr::null_mut(),
    }))
}

fn import_list_error(message: &str) -> *mut RawImportList {
    Box::into_raw(Box::new(RawImportList {
        records: ptr::null_mut(),
        len: 0,
        error: to_c_string(message),
    }))
}

/// Releases an import list returned by an importer trampoline.
///
/// # Safety
///
/// `list` must come from a trampoline in this module and must not be used
/// afterwards.
pub unsafe extern "C" fn sassette_free_import_list(list: *mut RawImportList) {
    if list.is_null() {
        return;
    }
    let list = unsafe { Box::from_raw(list) };
    if !list.error.is_null() {
        drop(unsafe { CString::from_raw(list.error) });
    }
    if !list.records.is_null() {
        let records = unsafe {
            Box::from_raw(std::slice::from_raw_parts_mut(list.records, list.len) as *mut [RawImportRecord])
        };
        for record in records.iter() {
            if !record.uri.is_null() {
                drop(unsafe { CString::from_raw(record.uri) });
            }
            if !record.contents.is_null() {
                drop(unsafe { CString::from_raw(record.contents) });
            }
            if !record.source_map.is_null() {
                drop(unsafe { CString::from_raw(record.source_map) });
            }
        }
    }
}

unsafe extern "C" fn importer_trampoline(
    url: *const c_char,
    prev: *const c_char,
    cookie: *mut c_void,
) -> *mut RawImportList {
    let entry = unsafe { &*(cookie as *const ImporterEntry) };
    let url = unsafe { c_str_to_string(url) };
    let prev = unsafe { c_str_to_opt_string(prev) };

    let outcome = catch_unwind(AssertUnwindSafe(|| (entry.handler)(&url, prev.as_deref())));
    match outcome {
        Ok(ImporterOutcome::NotHandled) => ptr::null_mut(),
        Ok(ImporterOutcome::Imports(records)) => import_records_to_raw(records),
        Ok(ImporterOutcome::Error(message)) => import_list_error(&message),
        Err(_) => import_list_error(&format!("importer for \"{}\" panicked", url)),
    }
}

unsafe extern "C" fn function_trampoline(
    argv: *const RawValue,
    argc: usize,
    cookie: *mut c_void,
) -> *mut RawValue {
    let entry = unsafe { &*(cookie as *const FunctionEntry) };
    let args: Vec<Value> = if argv.is_null() || argc == 0 {
        Vec::new()
    } else {
        unsafe { std::slice::from_raw_parts(argv, argc) }
            .iter()
            .map(|raw| unsafe { raw_to_value(raw) })
            .collect()
    };

    let result = catch_unwind(AssertUnwindSafe(|| (entry.handler)(&args)));
    let value = match result {
        Ok(value) => value,
        Err(_) => Value::Error(format!("{}: callback panicked", entry.signature)),
    };
    Box::into_raw(Box::new(value_to_raw(&value)))
}

/// Marshalled view of one [`EngineJob`]. Owns every C string and raw array
/// handed to the engine; borrows the job's importer/function entries as
/// cookies, which is sound because the job outlives the compile call.
struct MarshalledJob<'a> {
    raw: RawJob,
    _source: Option<CString>,
    _input_path: Option<CString>,
    _indent: CString,
    _linefeed: CString,
    _include_paths: Vec<CString>,
    _include_path_ptrs: Vec<*const c_char>,
    _out_file: Option<CString>,
    _source_map_file: Option<CString>,
    _source_map_root: Option<CString>,
    _signatures: Vec<CString>,
    _importers: Vec<RawImporterEntry>,
    _functions: Vec<RawFunctionEntry>,
    _job: std::marker::PhantomData<&'a EngineJob>,
}

fn opt_c_string(value: Option<&str>) -> Option<CString> {
    value.and_then(|s| CString::new(s).ok())
}

fn opt_ptr(value: &Option<CString>) -> *const c_char {
    value.as_ref().map_or(ptr::null(), |s| s.as_ptr())
}

impl<'a> MarshalledJob<'a> {
    fn new(job: &'a EngineJob) -> Self {
        let (input_kind, source, input_path) = match &job.input {
            EngineInput::Source { data, path } => (
                RAW_INPUT_SOURCE,
                CString::new(data.as_str()).ok(),
                path.as_ref().and_then(|p| CString::new(path_str(p)).ok()),
            ),
            EngineInput::Path(path) => (RAW_INPUT_PATH, None, CString::new(path_str(path)).ok()),
        };

        let options = &job.options;
        let indent = CString::new(options.indent.as_str()).unwrap_or_default();
        let linefeed = CString::new(options.linefeed.as_str()).unwrap_or_default();
        let include_paths: Vec<CString> = options
            .include_paths
            .iter()
            .filter_map(|p| CString::new(path_str(p)).ok())
            .collect();
        let include_path_ptrs: Vec<*const c_char> = include_paths.iter().map(|p| p.as_ptr()).collect();
        let out_file = opt_c_string(options.out_file.as_deref());
        let source_map_file = opt_c_string(options.source_map_file.as_deref());
        let source_map_root = opt_c_string(options.source_map_root.as_deref());

        let importers: Vec<RawImporterEntry> = job
            .importers
            .iter()
            .map(|entry| RawImporterEntry {
                fn_ptr: importer_trampoline,
                priority: entry.priority,
                cookie: entry as *const ImporterEntry as *mut c_void,
            })
            .collect();

        let signatures: Vec<CString> = job
            .functions
            .iter()
            .map(|entry| CString::new(entry.signature.as_str()).unwrap_or_default())
            .collect();
        let functions: Vec<RawFunctionEntry> = job
            .functions
            .iter()
            .zip(signatures.iter())
            .map(|(entry, signature)| RawFunctionEntry {
                signature: signature.as_ptr(),
                fn_ptr: function_trampoline,
                cookie: entry as *const FunctionEntry as *mut c_void,
            })
            .collect();

        let raw = RawJob {
            input_kind,
            source: source.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            input_path: input_path.as_ref().map_or(ptr::null(), |s| s.as_ptr()),
            options: RawOptions {
                output_style: options.output_style as c_int,
                indent: indent.as_ptr(),
                linefeed: linefeed.as_ptr(),
                precision: options.precision as c_int,
                indented_syntax: options.indented_syntax,
                source_comments: options.source_comments,
                omit_source_map_url: options.omit_source_map_url,
                source_map_embed: options.source_map_embed,
                source_map_contents: options.source_map_contents,
                include_paths: if include_path_ptrs.is_empty() {
                    ptr::null()
                } else {
                    include_path_ptrs.as_ptr()
                },
                include_paths_len: include_path_ptrs.len(),
                out_file: opt_ptr(&out_file),
                source_map_file: opt_ptr(&source_map_file),
                source_map_root: opt_ptr(&source_map_root),
            },
            importers: if importers.is_empty() {
                ptr::null()
            } else {
                importers.as_ptr()
            },
            importers_len: importers.len(),
            functions: if functions.is_empty() {
                ptr::null()
            } else {
                functions.as_ptr()
            },
            functions_len: functions.len(),
        };

        Self {
            raw,
            _source: source,
            _input_path: input_path,
            _indent: indent,
            _linefeed: linefeed,
            _include_paths: include_paths,
            _include_path_ptrs: include_path_ptrs,
            _out_file: out_file,
            _source_map_file: source_map_file,
            _source_map_root: source_map_root,
            _signatures: signatures,
            _importers: importers,
            _functions: functions,
            _job: std::marker::PhantomData,
        }
    }

    fn as_raw(&self) -> *const RawJob {
        &self.raw
    }
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_default()
}

/// [`Engine`] implementation over a C entry-point table.
pub struct RawEngine {
    api: RawEngineApi,
    reentrant: bool,
}

impl RawEngine {
    pub fn new(api: RawEngineApi) -> Self {
        Self {
            api,
            reentrant: false,
        }
    }

    /// Marks this engine build as verified safe for concurrent entry.
    pub fn verified_reentrant(mut self) -> Self {
        self.reentrant = true;
        self
    }
}

impl Engine for RawEngine {
    fn compile(&self, job: &EngineJob) -> EngineReport {
        let marshalled = MarshalledJob::new(job);
        let ctx = unsafe { (self.api.compile)(marshalled.as_raw()) };
        if ctx.is_null() {
            return EngineReport::failure(ErrorPayload::new("engine produced no compilation context"));
        }

        let report = unsafe {
            let status = (self.api.get_error_status)(ctx);
            if status == 0 {
                let output = c_str_to_string((self.api.get_output_text)(ctx));
                let source_map = c_str_to_opt_string((self.api.get_source_map_text)(ctx));
                let mut included_files = Vec::new();
                let files = (self.api.get_included_files)(ctx);
                if !files.is_null() {
                    let mut cursor = files;
                    while !(*cursor).is_null() {
                        included_files.push(c_str_to_string(*cursor));
                        cursor = cursor.add(1);
                    }
                }
                EngineReport::success(output, source_map, included_files)
            } else {
                EngineReport {
                    status,
                    output: None,
                    source_map: None,
                    included_files: Vec::new(),
                    error_json: c_str_to_opt_string((self.api.get_error_json)(ctx)),
                }
            }
        };

        unsafe { (self.api.free_context)(ctx) };
        report
    }

    fn version(&self) -> String {
        unsafe { c_str_to_string((self.api.version)()) }
    }

    fn reentrant(&self) -> bool {
        self.reentrant
    }
}
