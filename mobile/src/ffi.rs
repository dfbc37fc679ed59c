//! C interface for native front ends.
//!
//! Every handle returned here is owned by the caller and must be released
//! with the matching `*_free` function. Strings returned to C are released
//! with [`chat_string_free`].

use super::QuantizedModel;
use chatgen::tokenizer::load_tokenizer;
use chatgen::{ChatSession, GenerationConfig, GenerationEngine, SourcePaths, TokenId, Tokenizer};
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;

pub struct ChatHandle {
    session: ChatSession,
}

pub struct TokenizerHandle {
    tokenizer: Box<dyn Tokenizer>,
}

#[repr(C)]
pub struct TokenArray {
    pub ptr: *mut u32,
    pub len: usize,
}

impl TokenArray {
    fn empty() -> Self {
        TokenArray {
            ptr: std::ptr::null_mut(),
            len: 0,
        }
    }

    fn from_vec(ids: Vec<TokenId>) -> Self {
        let len = ids.len();
        let mut slice = ids.into_boxed_slice();
        let ptr = slice.as_mut_ptr();
        std::mem::forget(slice);
        TokenArray { ptr, len }
    }
}

unsafe fn path_arg(ptr: *const c_char) -> Option<PathBuf> {
    if ptr.is_null() {
        return None;
    }
    let s = CStr::from_ptr(ptr).to_string_lossy().into_owned();
    Some(PathBuf::from(s))
}

fn into_c_string(text: String) -> *mut c_char {
    match CString::new(text) {
        Ok(s) => s.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Open a chat session. `special_path` and `config_path` may be null.
///
/// # Safety
/// Non-null arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn chat_session_new(
    vocab_path: *const c_char,
    special_path: *const c_char,
    model_path: *const c_char,
    config_path: *const c_char,
) -> *mut ChatHandle {
    let (Some(vocabulary), Some(model)) = (path_arg(vocab_path), path_arg(model_path)) else {
        return std::ptr::null_mut();
    };
    let mut config = match path_arg(config_path) {
        Some(path) => match GenerationConfig::from_file(&path) {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("Failed to read config {}: {}", path.display(), e);
                return std::ptr::null_mut();
            }
        },
        None => GenerationConfig::default(),
    };
    config.sources = SourcePaths {
        vocabulary,
        special_tokens: path_arg(special_path),
        model,
    };

    let quantized = match QuantizedModel::load_mmap(&config.sources.model)
        .or_else(|_| QuantizedModel::load(&config.sources.model))
    {
        Ok(m) => m.with_tensor_names(config.tensors.clone()),
        Err(e) => {
            tracing::error!(
                "Failed to load model {}: {}",
                config.sources.model.display(),
                e
            );
            return std::ptr::null_mut();
        }
    };
    match GenerationEngine::from_sources(config, quantized) {
        Ok(engine) => Box::into_raw(Box::new(ChatHandle {
            session: ChatSession::spawn(engine, None),
        })),
        Err(e) => {
            tracing::error!("Failed to build engine: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// Run one turn and block until it finishes. Returns the reply text, an
/// empty string for blank input, or null when the session is busy or the
/// turn aborted.
///
/// # Safety
/// `handle` must come from [`chat_session_new`]; `text` must be a valid
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn chat_session_submit(
    handle: *mut ChatHandle,
    text: *const c_char,
) -> *mut c_char {
    if handle.is_null() || text.is_null() {
        return std::ptr::null_mut();
    }
    let handle = &*handle;
    let text = CStr::from_ptr(text).to_string_lossy();
    let reply = match handle.session.submit(&text).and_then(|pending| pending.wait()) {
        Ok(reply) => reply,
        Err(e) => {
            tracing::warn!("Turn not run: {}", e);
            return std::ptr::null_mut();
        }
    };
    if let Some(err) = reply.error() {
        tracing::warn!("Turn aborted: {}", err);
        return std::ptr::null_mut();
    }
    into_c_string(reply.text)
}

/// Forget the conversation so far. Returns 0 on success, -1 otherwise.
///
/// # Safety
/// `handle` must come from [`chat_session_new`].
#[no_mangle]
pub unsafe extern "C" fn chat_session_reset(handle: *mut ChatHandle) -> i32 {
    if handle.is_null() {
        return -1;
    }
    match (*handle).session.reset() {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// # Safety
/// `handle` must come from [`chat_session_new`] and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn chat_session_free(handle: *mut ChatHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}

/// # Safety
/// `ptr` must be a string returned by this library.
#[no_mangle]
pub unsafe extern "C" fn chat_string_free(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(CString::from_raw(ptr));
    }
}

/// Load a tokenizer on its own, for callers that only need text/id
/// conversion. `special_path` may be null.
///
/// # Safety
/// Non-null arguments must be valid NUL-terminated strings.
#[no_mangle]
pub unsafe extern "C" fn tokenizer_load(
    vocab_path: *const c_char,
    special_path: *const c_char,
) -> *mut TokenizerHandle {
    let Some(vocabulary) = path_arg(vocab_path) else {
        return std::ptr::null_mut();
    };
    let sources = SourcePaths {
        vocabulary,
        special_tokens: path_arg(special_path),
        ..Default::default()
    };
    match load_tokenizer(&sources) {
        Ok(tokenizer) => Box::into_raw(Box::new(TokenizerHandle { tokenizer })),
        Err(e) => {
            tracing::error!("Failed to load tokenizer: {}", e);
            std::ptr::null_mut()
        }
    }
}

/// # Safety
/// `handle` must come from [`tokenizer_load`]; `text` must be a valid
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn tokenizer_encode(
    handle: *mut TokenizerHandle,
    text: *const c_char,
    add_bos: bool,
    add_eos: bool,
) -> TokenArray {
    if handle.is_null() || text.is_null() {
        return TokenArray::empty();
    }
    let text = CStr::from_ptr(text).to_string_lossy();
    TokenArray::from_vec((*handle).tokenizer.encode(&text, add_bos, add_eos))
}

/// # Safety
/// `handle` must come from [`tokenizer_load`]; `ids` must point to `len`
/// readable ids.
#[no_mangle]
pub unsafe extern "C" fn tokenizer_decode(
    handle: *mut TokenizerHandle,
    ids: *const u32,
    len: usize,
) -> *mut c_char {
    if handle.is_null() || (ids.is_null() && len > 0) {
        return std::ptr::null_mut();
    }
    let ids = if len == 0 {
        &[][..]
    } else {
        std::slice::from_raw_parts(ids, len)
    };
    into_c_string((*handle).tokenizer.decode(ids))
}

/// # Safety
/// `arr` must come from [`tokenizer_encode`] and not be freed twice.
#[no_mangle]
pub unsafe extern "C" fn token_array_free(arr: TokenArray) {
    if !arr.ptr.is_null() {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(arr.ptr, arr.len)));
    }
}

/// # Safety
/// `handle` must come from [`tokenizer_load`] and not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn tokenizer_free(handle: *mut TokenizerHandle) {
    if !handle.is_null() {
        drop(Box::from_raw(handle));
    }
}
