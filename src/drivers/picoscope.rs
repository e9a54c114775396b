use std::ffi::c_void;
use std::os::raw::{c_float, c_short};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use libloading::Library;
use log::{debug, info, warn};
use once_cell::sync::OnceCell;

use crate::drivers::{DeviceError, DeviceSession};
use crate::types::Channel;

type PicoStatus = u32;

const PICO_OK: PicoStatus = 0x00;
const PICO_NOT_FOUND: PicoStatus = 0x03;
const PICO_BUSY: PicoStatus = 0x27;

const COUPLING_DC: i32 = 1;
const RANGE_2V: i32 = 7;
const RANGE_2V_MILLIVOLTS: f64 = 2000.0;
const RATIO_MODE_NONE: i32 = 0;
const TIME_UNITS_US: i32 = 3;
const STREAMING_INTERVAL_US: u32 = 250;
const SERIAL_LIST_CAPACITY: usize = 256;

type StreamingReady = unsafe extern "C" fn(
    handle: c_short,
    no_of_samples: i32,
    start_index: u32,
    overflow: c_short,
    trigger_at: u32,
    triggered: c_short,
    auto_stop: c_short,
    parameter: *mut c_void,
);

struct Ps2000aApi {
    #[allow(dead_code)]
    lib: Library,
    enumerate_units: unsafe extern "C" fn(*mut c_short, *mut i8, *mut c_short) -> PicoStatus,
    open_unit: unsafe extern "C" fn(*mut c_short, *mut i8) -> PicoStatus,
    close_unit: unsafe extern "C" fn(c_short) -> PicoStatus,
    set_channel: unsafe extern "C" fn(c_short, i32, c_short, i32, i32, c_float) -> PicoStatus,
    maximum_value: unsafe extern "C" fn(c_short, *mut c_short) -> PicoStatus,
    set_data_buffers:
        unsafe extern "C" fn(c_short, i32, *mut c_short, *mut c_short, i32, u32, i32) -> PicoStatus,
    run_streaming:
        unsafe extern "C" fn(c_short, *mut u32, i32, u32, u32, c_short, u32, i32, u32) -> PicoStatus,
    get_streaming_latest_values:
        unsafe extern "C" fn(c_short, StreamingReady, *mut c_void) -> PicoStatus,
    stop: unsafe extern "C" fn(c_short) -> PicoStatus,
}

impl Ps2000aApi {
    fn load() -> Result<Self, DeviceError> {
        let name = libloading::library_filename("ps2000a");
        let lib = unsafe { Library::new(&name) }.map_err(|e| {
            DeviceError::LibraryUnavailable(format!("{}: {e}", name.to_string_lossy()))
        })?;
        let missing = |e: libloading::Error| DeviceError::LibraryUnavailable(e.to_string());
        // Safety: signatures follow the PicoScope 2000A programmer's guide.
        unsafe {
            Ok(Self {
                enumerate_units: *lib.get(b"ps2000aEnumerateUnits\0").map_err(missing)?,
                open_unit: *lib.get(b"ps2000aOpenUnit\0").map_err(missing)?,
                close_unit: *lib.get(b"ps2000aCloseUnit\0").map_err(missing)?,
                set_channel: *lib.get(b"ps2000aSetChannel\0").map_err(missing)?,
                maximum_value: *lib.get(b"ps2000aMaximumValue\0").map_err(missing)?,
                set_data_buffers: *lib.get(b"ps2000aSetDataBuffers\0").map_err(missing)?,
                run_streaming: *lib.get(b"ps2000aRunStreaming\0").map_err(missing)?,
                get_streaming_latest_values: *lib
                    .get(b"ps2000aGetStreamingLatestValues\0")
                    .map_err(missing)?,
                stop: *lib.get(b"ps2000aStop\0").map_err(missing)?,
                lib,
            })
        }
    }

    fn instance() -> Result<&'static Ps2000aApi, DeviceError> {
        static API: OnceCell<Ps2000aApi> = OnceCell::new();
        API.get_or_try_init(Self::load)
    }
}

// Raised by the driver from inside `get_streaming_latest_values`.
unsafe extern "C" fn on_streaming_ready(
    _handle: c_short,
    _no_of_samples: i32,
    _start_index: u32,
    _overflow: c_short,
    _trigger_at: u32,
    _triggered: c_short,
    _auto_stop: c_short,
    parameter: *mut c_void,
) {
    if let Some(flag) = (parameter as *const AtomicBool).as_ref() {
        flag.store(true, Ordering::Release);
    }
}

// The driver reports serials as one comma separated, NUL terminated string.
fn parse_serial_list(raw: &[u8]) -> Vec<String> {
    let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end])
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Calls `poll` until the readiness flag is raised or `timeout` runs out.
/// `PICO_BUSY` keeps polling; any other non-OK status aborts.
fn poll_until_ready(
    channel: Channel,
    timeout: Duration,
    mut poll: impl FnMut(&AtomicBool) -> PicoStatus,
) -> Result<(), DeviceError> {
    let ready = AtomicBool::new(false);
    let started = Instant::now();
    loop {
        let status = poll(&ready);
        if status != PICO_OK && status != PICO_BUSY {
            return Err(DeviceError::AcquireFailed {
                channel,
                step: "ps2000aGetStreamingLatestValues",
                status,
            });
        }
        if ready.load(Ordering::Acquire) {
            return Ok(());
        }
        let waited = started.elapsed();
        if waited >= timeout {
            return Err(DeviceError::Timeout { channel, waited });
        }
        thread::yield_now();
    }
}

/// PicoScope 2000A unit with a fixed ±2 V DC range on every enabled channel.
pub struct PicoScopeSession {
    api: &'static Ps2000aApi,
    handle: c_short,
    channels: Vec<Channel>,
    max_adc: c_short,
    poll_timeout: Duration,
    closed: bool,
}

impl PicoScopeSession {
    /// Serial numbers of every 2000A unit on the bus, without opening any.
    pub fn enumerate() -> Result<Vec<String>, DeviceError> {
        let api = Ps2000aApi::instance()?;
        let mut count: c_short = 0;
        let mut serials = [0u8; SERIAL_LIST_CAPACITY];
        let mut length = SERIAL_LIST_CAPACITY as c_short;
        let status = unsafe {
            (api.enumerate_units)(&mut count, serials.as_mut_ptr() as *mut i8, &mut length)
        };
        match status {
            PICO_OK => {
                let used = (length.max(0) as usize).min(SERIAL_LIST_CAPACITY);
                let found = parse_serial_list(&serials[..used]);
                debug!("ps2000aEnumerateUnits: {count} unit(s) {found:?}");
                Ok(found)
            }
            PICO_NOT_FOUND => Ok(Vec::new()),
            status => Err(DeviceError::OpenFailed(format!(
                "ps2000aEnumerateUnits returned {status:#x}"
            ))),
        }
    }

    /// Opens the first unit found and enables `channels`.
    pub fn open(channels: Vec<Channel>, poll_timeout: Duration) -> Result<Self, DeviceError> {
        let api = Ps2000aApi::instance()?;
        let mut handle: c_short = 0;
        let status = unsafe { (api.open_unit)(&mut handle, std::ptr::null_mut()) };
        if status != PICO_OK {
            return Err(DeviceError::OpenFailed(format!(
                "ps2000aOpenUnit returned {status:#x}"
            )));
        }
        // From here on the unit is ours; Drop closes it if setup fails.
        let mut session = Self {
            api,
            handle,
            channels,
            max_adc: 0,
            poll_timeout,
            closed: false,
        };
        for channel in &session.channels {
            let status = unsafe {
                (api.set_channel)(handle, channel.index(), 1, COUPLING_DC, RANGE_2V, 0.0)
            };
            if status != PICO_OK {
                return Err(DeviceError::OpenFailed(format!(
                    "ps2000aSetChannel({channel}) returned {status:#x}"
                )));
            }
        }
        let mut max_adc: c_short = 0;
        let status = unsafe { (api.maximum_value)(handle, &mut max_adc) };
        if status != PICO_OK || max_adc <= 0 {
            return Err(DeviceError::OpenFailed(format!(
                "ps2000aMaximumValue returned {status:#x} (max {max_adc})"
            )));
        }
        session.max_adc = max_adc;
        info!(
            "PicoScope opened (handle {handle}, max ADC {max_adc}, {} channels)",
            session.channels.len()
        );
        Ok(session)
    }

    fn check(&self, channel: Channel, step: &'static str, status: PicoStatus) -> Result<(), DeviceError> {
        if status == PICO_OK {
            Ok(())
        } else {
            Err(DeviceError::AcquireFailed {
                channel,
                step,
                status,
            })
        }
    }

    fn adc_to_millivolts(&self, raw: c_short) -> f64 {
        raw as f64 * RANGE_2V_MILLIVOLTS / self.max_adc as f64
    }

    fn wait_ready(&self, channel: Channel) -> Result<(), DeviceError> {
        let (api, handle) = (self.api, self.handle);
        poll_until_ready(channel, self.poll_timeout, |ready| unsafe {
            (api.get_streaming_latest_values)(
                handle,
                on_streaming_ready,
                ready as *const AtomicBool as *mut c_void,
            )
        })
    }
}

impl DeviceSession for PicoScopeSession {
    fn channels(&self) -> &[Channel] {
        &self.channels
    }

    fn acquire_one(&mut self, channel: Channel) -> Result<f64, DeviceError> {
        if !self.channels.contains(&channel) {
            return Err(DeviceError::ChannelNotConfigured(channel));
        }
        let mut raw: [c_short; 1] = [0];
        let status = unsafe {
            (self.api.set_data_buffers)(
                self.handle,
                channel.index(),
                raw.as_mut_ptr(),
                std::ptr::null_mut(),
                raw.len() as i32,
                0,
                RATIO_MODE_NONE,
            )
        };
        self.check(channel, "ps2000aSetDataBuffers", status)?;

        let mut interval = STREAMING_INTERVAL_US;
        let status = unsafe {
            (self.api.run_streaming)(
                self.handle,
                &mut interval,
                TIME_UNITS_US,
                0,
                1,
                1,
                1,
                RATIO_MODE_NONE,
                1,
            )
        };
        self.check(channel, "ps2000aRunStreaming", status)?;

        let polled = self.wait_ready(channel);
        // The streaming window is stopped even when polling failed.
        let stop_status = unsafe { (self.api.stop)(self.handle) };
        polled?;
        self.check(channel, "ps2000aStop", stop_status)?;

        let mv = self.adc_to_millivolts(raw[0]);
        debug!("{channel}: raw {} -> {mv:.3} mV", raw[0]);
        Ok(mv)
    }

    fn close(&mut self) -> Result<(), DeviceError> {
        self.closed = true;
        let status = unsafe { (self.api.close_unit)(self.handle) };
        if status == PICO_OK {
            info!("PicoScope closed (handle {})", self.handle);
            Ok(())
        } else {
            Err(DeviceError::CloseFailed(format!(
                "ps2000aCloseUnit returned {status:#x}"
            )))
        }
    }
}

impl Drop for PicoScopeSession {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(e) = self.close() {
                warn!("{e}");
            }
        }
    }
}
