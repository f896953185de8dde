//! Host side of the binary module contract
//!
//! A [`ModuleInstance`] owns one instantiated wasm core: its store, its
//! linear memory and typed handles to the exports the contract names.
//! Every guest call goes through [`ModuleInstance::call`], which turns traps
//! and `env.abort` into [`SessionError::ModuleFault`].

use bitflags::bitflags;
use cw_core::system::WASM_PAGE_SIZE;
use cw_core::{ScreenGeometry, SessionError, SystemDescriptor};
use tracing::{debug, warn};
use wasmtime::{
    Caller, Engine, Extern, ExternType, Instance, Linker, Memory, MemoryType, Module, Store,
    TypedFunc, Val, ValType, WasmParams, WasmResults,
};

/// Export and import names of the module contract
pub mod names {
    pub const IMPORT_MODULE: &str = "env";
    pub const IMPORT_MEMORY: &str = "memory";
    pub const IMPORT_ABORT: &str = "abort";
    pub const IMPORT_CONSOLE_LOG: &str = "console_log";

    pub const EXPORT_MEMORY: &str = "memory";
    pub const EXPORT_INIT: &str = "init";
    pub const EXPORT_FRAME: &str = "frame";
    pub const EXPORT_START: &str = "start";
    pub const EXPORT_ALLOC: &str = "alloc";
    pub const EXPORT_FREE: &str = "free";
    pub const EXPORT_FRAMEBUFFER: &str = "framebuffer";
    pub const EXPORT_FRAMEBUFFER_BOTTOM: &str = "framebuffer_bottom";
    pub const EXPORT_STATE_SIZE: &str = "state_size";
    pub const EXPORT_SAVE_STATE: &str = "save_state";
    pub const EXPORT_LOAD_STATE: &str = "load_state";
    pub const EXPORT_HALT: &str = "halt";
    pub const EXPORT_LOAD_BIOS: &str = "load_bios";
}

use names::*;

bitflags! {
    /// Optional exports found on a module
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ModuleCapabilities: u32 {
        const ALLOC = 1 << 0;
        const FREE = 1 << 1;
        const START = 1 << 2;
        const FRAMEBUFFER = 1 << 3;
        const FRAMEBUFFER_BOTTOM = 1 << 4;
        /// `state_size` + `save_state`
        const SAVE_STATE = 1 << 5;
        const LOAD_STATE = 1 << 6;
        const HALT = 1 << 7;
        const FIRMWARE = 1 << 8;
    }
}

/// Per-store host data
#[derive(Debug, Default)]
struct GuestState {
    system: String,
    /// Set by `env.abort`; consumed after the guest call returns
    abort: Option<String>,
    /// Memory the host created for an `env.memory` import
    imported_memory: Option<Memory>,
}

/// Which screen a framebuffer belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Screen {
    Primary,
    Secondary,
}

#[derive(Clone)]
struct Exports {
    init: TypedFunc<(), ()>,
    frame: TypedFunc<(), ()>,
    start: Option<TypedFunc<(i32, i32), ()>>,
    alloc: Option<TypedFunc<i32, i32>>,
    free: Option<TypedFunc<(i32, i32), ()>>,
    framebuffer: Option<TypedFunc<(), i32>>,
    framebuffer_bottom: Option<TypedFunc<(), i32>>,
    state_size: Option<TypedFunc<(), i32>>,
    save_state: Option<TypedFunc<(), i32>>,
    load_state: Option<TypedFunc<(i32, i32), i32>>,
    halt: Option<TypedFunc<(), ()>>,
    load_bios: Option<TypedFunc<(i32, i32), ()>>,
}

/// Location of bytes the host copied into module memory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuestRegion {
    pub ptr: u32,
    pub len: u32,
    /// Obtained from the module's `alloc` export (and so released through `free`)
    pub allocated: bool,
}

/// One instantiated module with its sandbox
pub struct ModuleInstance {
    store: Store<GuestState>,
    memory: Memory,
    exports: Exports,
    capabilities: ModuleCapabilities,
}

impl std::fmt::Debug for ModuleInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleInstance")
            .field("system", &self.store.data().system)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

fn load_error(context: &str, err: impl std::fmt::Display) -> SessionError {
    SessionError::ModuleLoad(format!("{context}: {err}"))
}

/// Compile a module binary (or wasm text) for `engine`
pub fn compile(engine: &Engine, bytes: &[u8]) -> Result<Module, SessionError> {
    Module::new(engine, bytes).map_err(|e| load_error("compile failed", e))
}

fn zero_results(ty: &wasmtime::FuncType, results: &mut [Val]) {
    for (slot, ty) in results.iter_mut().zip(ty.results()) {
        *slot = match ty {
            ValType::I32 => Val::I32(0),
            ValType::I64 => Val::I64(0),
            ValType::F32 => Val::F32(0),
            ValType::F64 => Val::F64(0),
            _ => continue,
        };
    }
}

/// Satisfy the `env.*` imports the host knows how to provide
fn define_host_imports(
    linker: &mut Linker<GuestState>,
    store: &mut Store<GuestState>,
    module: &Module,
    descriptor: &SystemDescriptor,
) -> Result<(), SessionError> {
    for import in module.imports() {
        if import.module() != IMPORT_MODULE {
            continue;
        }
        match (import.name(), import.ty()) {
            (IMPORT_MEMORY, ExternType::Memory(ty)) => {
                if ty.is_shared() || ty.is_64() {
                    return Err(SessionError::ModuleLoad(
                        "shared or 64-bit env.memory is not supported".to_string(),
                    ));
                }
                let minimum = ty.minimum().max(u64::from(descriptor.initial_memory_pages));
                let minimum = u32::try_from(minimum)
                    .map_err(|e| load_error("env.memory minimum out of range", e))?;
                let maximum = ty.maximum().and_then(|m| u32::try_from(m).ok());
                if maximum.is_some_and(|max| max < minimum) {
                    return Err(SessionError::ModuleLoad(format!(
                        "env.memory maximum is below the {minimum} pages the system needs"
                    )));
                }

                let memory = Memory::new(&mut *store, MemoryType::new(minimum, maximum))
                    .map_err(|e| load_error("create env.memory", e))?;
                store.data_mut().imported_memory = Some(memory);
                linker
                    .define(&mut *store, IMPORT_MODULE, IMPORT_MEMORY, memory)
                    .map_err(|e| load_error("define env.memory", e))?;
            }
            (IMPORT_ABORT, ExternType::Func(ty)) => {
                let signature = ty.clone();
                linker
                    .func_new(
                        IMPORT_MODULE,
                        IMPORT_ABORT,
                        ty,
                        move |mut caller: Caller<'_, GuestState>, params: &[Val], results: &mut [Val]| {
                            let args: Vec<String> = params
                                .iter()
                                .map(|v| match v.i32() {
                                    Some(n) => n.to_string(),
                                    None => "?".to_string(),
                                })
                                .collect();
                            let message = format!("env.abort({})", args.join(", "));
                            warn!(target: "cw_session::guest", "[{}] {}", caller.data().system, message);
                            caller.data_mut().abort = Some(message);
                            zero_results(&signature, results);
                            Ok(())
                        },
                    )
                    .map_err(|e| load_error("define env.abort", e))?;
            }
            (IMPORT_CONSOLE_LOG, ExternType::Func(ty)) => {
                let signature = ty.clone();
                linker
                    .func_new(
                        IMPORT_MODULE,
                        IMPORT_CONSOLE_LOG,
                        ty,
                        move |mut caller: Caller<'_, GuestState>, params: &[Val], results: &mut [Val]| {
                            let ptr = params.first().and_then(Val::i32);
                            let len = params.get(1).and_then(Val::i32);
                            let memory = caller
                                .get_export(EXPORT_MEMORY)
                                .and_then(Extern::into_memory)
                                .or(caller.data().imported_memory);
                            if let (Some(ptr), Some(len), Some(memory)) = (ptr, len, memory) {
                                let data = memory.data(&caller);
                                let start = ptr as u32 as usize;
                                let end = start.saturating_add(len as u32 as usize);
                                if let Some(bytes) = data.get(start..end) {
                                    debug!(
                                        target: "cw_session::guest",
                                        "[{}] {}",
                                        caller.data().system,
                                        String::from_utf8_lossy(bytes)
                                    );
                                }
                            }
                            zero_results(&signature, results);
                            Ok(())
                        },
                    )
                    .map_err(|e| load_error("define env.console_log", e))?;
            }
            // Anything else stays undefined; instantiation reports it
            _ => {}
        }
    }
    Ok(())
}

fn optional<P, R>(
    instance: &Instance,
    store: &mut Store<GuestState>,
    name: &str,
) -> Result<Option<TypedFunc<P, R>>, SessionError>
where
    P: WasmParams,
    R: WasmResults,
{
    match instance.get_func(&mut *store, name) {
        None => Ok(None),
        Some(func) => func
            .typed::<P, R>(&*store)
            .map(Some)
            .map_err(|e| load_error(&format!("export '{name}' has the wrong signature"), e)),
    }
}

fn required<P, R>(
    instance: &Instance,
    store: &mut Store<GuestState>,
    name: &str,
) -> Result<TypedFunc<P, R>, SessionError>
where
    P: WasmParams,
    R: WasmResults,
{
    optional(instance, store, name)?
        .ok_or_else(|| SessionError::ModuleLoad(format!("missing required export '{name}'")))
}

impl ModuleInstance {
    /// Instantiate a compiled module in a fresh store and run its `init` export.
    ///
    /// Linear memory is grown to at least the descriptor's page count.
    pub fn instantiate(
        engine: &Engine,
        module: &Module,
        descriptor: &SystemDescriptor,
    ) -> Result<Self, SessionError> {
        let mut store = Store::new(
            engine,
            GuestState {
                system: descriptor.system_id.to_string(),
                ..GuestState::default()
            },
        );
        let mut linker = Linker::new(engine);
        define_host_imports(&mut linker, &mut store, module, descriptor)?;

        let instance = linker
            .instantiate(&mut store, module)
            .map_err(|e| load_error("instantiate failed", e))?;

        let memory = instance
            .get_memory(&mut store, EXPORT_MEMORY)
            .or(store.data().imported_memory)
            .ok_or_else(|| SessionError::ModuleLoad("module has no linear memory".to_string()))?;

        let want = descriptor.min_memory_bytes();
        let have = memory.data_size(&store) as u64;
        if have < want {
            let pages = (want - have).div_ceil(WASM_PAGE_SIZE);
            memory
                .grow(&mut store, pages)
                .map_err(|e| load_error(&format!("cannot reserve {want} bytes"), e))?;
        }

        let exports = Exports {
            init: required(&instance, &mut store, EXPORT_INIT)?,
            frame: required(&instance, &mut store, EXPORT_FRAME)?,
            start: optional(&instance, &mut store, EXPORT_START)?,
            alloc: optional(&instance, &mut store, EXPORT_ALLOC)?,
            free: optional(&instance, &mut store, EXPORT_FREE)?,
            framebuffer: optional(&instance, &mut store, EXPORT_FRAMEBUFFER)?,
            framebuffer_bottom: optional(&instance, &mut store, EXPORT_FRAMEBUFFER_BOTTOM)?,
            state_size: optional(&instance, &mut store, EXPORT_STATE_SIZE)?,
            save_state: optional(&instance, &mut store, EXPORT_SAVE_STATE)?,
            load_state: optional(&instance, &mut store, EXPORT_LOAD_STATE)?,
            halt: optional(&instance, &mut store, EXPORT_HALT)?,
            load_bios: optional(&instance, &mut store, EXPORT_LOAD_BIOS)?,
        };

        let mut capabilities = ModuleCapabilities::empty();
        capabilities.set(ModuleCapabilities::ALLOC, exports.alloc.is_some());
        capabilities.set(ModuleCapabilities::FREE, exports.free.is_some());
        capabilities.set(ModuleCapabilities::START, exports.start.is_some());
        capabilities.set(ModuleCapabilities::FRAMEBUFFER, exports.framebuffer.is_some());
        capabilities.set(
            ModuleCapabilities::FRAMEBUFFER_BOTTOM,
            exports.framebuffer_bottom.is_some(),
        );
        capabilities.set(
            ModuleCapabilities::SAVE_STATE,
            exports.save_state.is_some() && exports.state_size.is_some(),
        );
        capabilities.set(ModuleCapabilities::LOAD_STATE, exports.load_state.is_some());
        capabilities.set(ModuleCapabilities::HALT, exports.halt.is_some());
        capabilities.set(ModuleCapabilities::FIRMWARE, exports.load_bios.is_some());

        let mut module = Self {
            store,
            memory,
            exports,
            capabilities,
        };

        let init = module.exports.init.clone();
        module
            .call(EXPORT_INIT, &init, ())
            .map_err(|e| SessionError::ModuleLoad(e.to_string()))?;

        debug!(
            "[{}] module ready: {} pages, capabilities {:?}",
            descriptor.system_id,
            module.memory.size(&module.store),
            module.capabilities
        );
        Ok(module)
    }

    pub fn capabilities(&self) -> ModuleCapabilities {
        self.capabilities
    }

    /// Current linear memory size in bytes
    pub fn memory_len(&self) -> usize {
        self.memory.data_size(&self.store)
    }

    fn call<P, R>(&mut self, name: &str, func: &TypedFunc<P, R>, params: P) -> Result<R, SessionError>
    where
        P: WasmParams,
        R: WasmResults,
    {
        let result = func
            .call(&mut self.store, params)
            .map_err(|e| SessionError::ModuleFault(format!("{name}: {e}")));
        if let Some(message) = self.store.data_mut().abort.take() {
            return Err(SessionError::ModuleFault(format!("{name}: {message}")));
        }
        result
    }

    fn check_range(&self, ptr: u32, len: usize) -> bool {
        (ptr as usize)
            .checked_add(len)
            .is_some_and(|end| end <= self.memory_len())
    }

    /// Copy `bytes` into module memory.
    ///
    /// Uses the module's `alloc` export when present, else the fixed `offset`.
    pub fn place(&mut self, bytes: &[u8], offset: u32) -> Result<GuestRegion, SessionError> {
        let len = i32::try_from(bytes.len())
            .map_err(|_| SessionError::AssetTooLarge { len: bytes.len() })?;

        let region = match self.exports.alloc.clone() {
            Some(alloc) => {
                let ptr = self.call(EXPORT_ALLOC, &alloc, len)?;
                if ptr <= 0 {
                    return Err(SessionError::AssetTooLarge { len: bytes.len() });
                }
                GuestRegion {
                    ptr: ptr as u32,
                    len: len as u32,
                    allocated: true,
                }
            }
            None => GuestRegion {
                ptr: offset,
                len: len as u32,
                allocated: false,
            },
        };

        if !self.check_range(region.ptr, bytes.len()) {
            if region.allocated {
                return Err(SessionError::ModuleFault(format!(
                    "alloc returned out-of-bounds region 0x{:x}+{}",
                    region.ptr,
                    bytes.len()
                )));
            }
            return Err(SessionError::AssetTooLarge { len: bytes.len() });
        }

        self.memory
            .write(&mut self.store, region.ptr as usize, bytes)
            .map_err(|e| SessionError::ModuleFault(format!("copy into module memory: {e}")))?;
        Ok(region)
    }

    /// Hand a region previously returned by [`Self::place`] back to the module
    pub fn release(&mut self, region: GuestRegion) -> Result<(), SessionError> {
        if !region.allocated {
            return Ok(());
        }
        match self.exports.free.clone() {
            Some(free) => self.call(EXPORT_FREE, &free, (region.ptr as i32, region.len as i32)),
            None => Ok(()),
        }
    }

    /// Call the `start` entry point with an asset location
    pub fn start(&mut self, region: GuestRegion) -> Result<(), SessionError> {
        match self.exports.start.clone() {
            Some(start) => self.call(EXPORT_START, &start, (region.ptr as i32, region.len as i32)),
            None => Ok(()),
        }
    }

    /// Advance one frame
    pub fn frame(&mut self) -> Result<(), SessionError> {
        let frame = self.exports.frame.clone();
        self.call(EXPORT_FRAME, &frame, ())
    }

    /// Call the `halt` export if present
    pub fn halt(&mut self) -> Result<(), SessionError> {
        match self.exports.halt.clone() {
            Some(halt) => self.call(EXPORT_HALT, &halt, ()),
            None => Ok(()),
        }
    }

    /// Copy firmware into module memory and pass it to `load_bios`.
    ///
    /// The region is only valid for the duration of the call; the module
    /// keeps its own copy. Returns `false` if the module takes no firmware.
    pub fn load_firmware(&mut self, bytes: &[u8], offset: u32) -> Result<bool, SessionError> {
        let Some(load_bios) = self.exports.load_bios.clone() else {
            return Ok(false);
        };
        let region = self.place(bytes, offset)?;
        self.call(EXPORT_LOAD_BIOS, &load_bios, (region.ptr as i32, region.len as i32))?;
        self.release(region)?;
        Ok(true)
    }

    /// Borrow one screen's framebuffer straight out of linear memory
    pub fn framebuffer(
        &mut self,
        screen: Screen,
        geometry: ScreenGeometry,
    ) -> Result<Option<&[u8]>, SessionError> {
        let (name, func) = match screen {
            Screen::Primary => (EXPORT_FRAMEBUFFER, self.exports.framebuffer.clone()),
            Screen::Secondary => (EXPORT_FRAMEBUFFER_BOTTOM, self.exports.framebuffer_bottom.clone()),
        };
        let Some(func) = func else {
            return Ok(None);
        };

        let ptr = self.call(name, &func, ())? as u32;
        let len = geometry.frame_len();
        if !self.check_range(ptr, len) {
            return Err(SessionError::ModuleFault(format!(
                "{name} points outside linear memory (0x{ptr:x}+{len})"
            )));
        }
        let start = ptr as usize;
        Ok(Some(&self.memory.data(&self.store)[start..start + len]))
    }

    /// Serialize the guest state. `Ok(None)` if the module cannot export state.
    pub fn save_state(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        let (Some(state_size), Some(save_state)) =
            (self.exports.state_size.clone(), self.exports.save_state.clone())
        else {
            return Ok(None);
        };

        let size = self.call(EXPORT_STATE_SIZE, &state_size, ())?;
        let ptr = self.call(EXPORT_SAVE_STATE, &save_state, ())?;
        let len = usize::try_from(size)
            .map_err(|_| SessionError::ModuleFault(format!("state_size returned {size}")))?;
        if !self.check_range(ptr as u32, len) {
            return Err(SessionError::ModuleFault(format!(
                "save_state buffer 0x{:x}+{} is outside linear memory",
                ptr as u32, len
            )));
        }

        let start = ptr as u32 as usize;
        Ok(Some(self.memory.data(&self.store)[start..start + len].to_vec()))
    }

    /// Feed a serialized state back in.
    ///
    /// Without `alloc` the bytes are written into the module's own state
    /// buffer, which fixes their length to `state_size()`; if the module then
    /// rejects them the buffer's previous contents are put back.
    pub fn load_state(&mut self, bytes: &[u8]) -> Result<LoadStateOutcome, SessionError> {
        let Some(load_state) = self.exports.load_state.clone() else {
            return Ok(LoadStateOutcome::Unsupported);
        };

        let (region, previous) = if self.exports.alloc.is_some() {
            match self.place(bytes, 0) {
                Ok(region) => (region, None),
                Err(SessionError::AssetTooLarge { .. }) => return Ok(LoadStateOutcome::Rejected),
                Err(e) => return Err(e),
            }
        } else {
            let (Some(state_size), Some(save_state)) =
                (self.exports.state_size.clone(), self.exports.save_state.clone())
            else {
                return Ok(LoadStateOutcome::Unsupported);
            };
            let size = self.call(EXPORT_STATE_SIZE, &state_size, ())?;
            if usize::try_from(size).ok() != Some(bytes.len()) {
                return Ok(LoadStateOutcome::Rejected);
            }
            let ptr = self.call(EXPORT_SAVE_STATE, &save_state, ())? as u32;
            if !self.check_range(ptr, bytes.len()) {
                return Err(SessionError::ModuleFault(
                    "save_state buffer is outside linear memory".to_string(),
                ));
            }
            let start = ptr as usize;
            let previous = self.memory.data(&self.store)[start..start + bytes.len()].to_vec();
            self.memory
                .write(&mut self.store, start, bytes)
                .map_err(|e| SessionError::ModuleFault(format!("copy state: {e}")))?;
            let region = GuestRegion {
                ptr,
                len: bytes.len() as u32,
                allocated: false,
            };
            (region, Some(previous))
        };

        let status = self.call(
            EXPORT_LOAD_STATE,
            &load_state,
            (region.ptr as i32, region.len as i32),
        );
        let released = self.release(region);
        let status = status?;
        released?;

        if status == 0 {
            return Ok(LoadStateOutcome::Restored);
        }
        if let Some(previous) = previous {
            self.memory
                .write(&mut self.store, region.ptr as usize, &previous)
                .map_err(|e| SessionError::ModuleFault(format!("roll back state: {e}")))?;
        }
        Ok(LoadStateOutcome::Rejected)
    }
}

/// Result of handing a serialized state to a module
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStateOutcome {
    Restored,
    Rejected,
    Unsupported,
}
