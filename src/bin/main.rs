#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

extern crate alloc;

use core::cell::RefCell;

use embassy_executor::Spawner;
use embassy_net::StackResources;
use embassy_time::Timer;
use embedded_hal_bus::spi::ExclusiveDevice;
use esp_hal::{
    clock::CpuClock,
    delay::Delay,
    gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull},
    rng::Rng,
    rtc_cntl::reset_reason,
    spi::master::Spi,
    system::Cpu,
    time::{Instant, Rate},
    timer::timg::TimerGroup,
};
use log::{LevelFilter, error, info, warn};
use smartclock_core::{
    boot::{BootDecision, begin_boot},
    button::{ButtonConfig, InputProvider},
    connectivity::{ConnectivityPolicy, RandomSource},
    device::{Action, Device, DeviceParts},
    reset::{StoreResetTarget, perform_emergency_reset, perform_factory_reset},
};
use smartclock_hal_esp32s3::{
    input::button::ButtonInput,
    network::{EspWifiRadio, access_point_config, station_config},
    platform::{display::TftStatusDisplay, rng::HardwareRng},
    storage::{FlashCredentialStore, FlashFileArea, FlashLayout, SettingsEeprom},
};
use st7789::{Config as PanelConfig, St7789};
use static_cell::StaticCell;

#[path = "main/http.rs"]
mod http;
#[path = "main/logger.rs"]
mod logger;
#[path = "main/sntp.rs"]
mod sntp;

const CONTROL_TICK_MS: u64 = 100;
const RESTART_GRACE_MS: u64 = 250;
const AP_SEED_SALT: u64 = 0x5A17_2B34_D099_EE11;

static STATION_RESOURCES: StaticCell<StackResources<5>> = StaticCell::new();
static AP_RESOURCES: StaticCell<StackResources<3>> = StaticCell::new();

#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    loop {}
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

/// Milliseconds since power-on.
pub(crate) fn now_ms() -> u64 {
    Instant::now().duration_since_epoch().as_millis()
}

pub(crate) fn restart() -> ! {
    info!("system: restarting");
    esp_hal::system::software_reset()
}

async fn halt(reason: &str) -> ! {
    error!("system: {}; halting", reason);
    loop {
        Timer::after_secs(1).await;
    }
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(_spawner: Spawner) -> ! {
    logger::init(LevelFilter::Info);
    esp_println::println!("boot: smartclock starting");

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);
    info!("boot: reset_reason={:?}", reset_reason(Cpu::ProCpu));

    // esp-radio requires an allocator.
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // Boot checks run before anything else reads persisted state.
    let layout = match FlashLayout::discover() {
        Ok(layout) => Some(layout),
        Err(err) => {
            error!("flash: no usable data partition: {:?}", err);
            None
        }
    };
    let mut eeprom = SettingsEeprom::open(layout.as_ref());

    let mut credentials = match layout.as_ref().map(FlashCredentialStore::new) {
        Some(Ok(store)) => store,
        Some(Err(err)) => {
            warn!("wifi: credential sector unavailable: {:?}", err);
            FlashCredentialStore::detached()
        }
        None => FlashCredentialStore::detached(),
    };
    let mut files = match layout.as_ref().map(FlashFileArea::new) {
        Some(Ok(area)) => area,
        Some(Err(err)) => {
            warn!("files: image area unavailable: {:?}", err);
            FlashFileArea::detached()
        }
        None => FlashFileArea::detached(),
    };

    match begin_boot(&mut eeprom) {
        BootDecision::EmergencyReset => {
            let report = perform_emergency_reset(&mut eeprom);
            info!("reset: emergency reset complete={}", report.is_complete());
            restart();
        }
        BootDecision::FactoryReset => {
            let report = perform_factory_reset(&mut StoreResetTarget {
                eeprom: &mut eeprom,
                credentials: &mut credentials,
                files: &mut files,
            });
            info!("reset: factory reset complete={}", report.is_complete());
            restart();
        }
        BootDecision::Continue {
            boot_failures,
            power_cycles,
        } => info!(
            "boot: unconfirmed_boots={} power_cycles={} volatile_settings={}",
            boot_failures,
            power_cycles,
            eeprom.is_volatile()
        ),
    }

    // ST7789 wiring: SCK=GPIO12 MOSI=GPIO11 CS=GPIO10 DC=GPIO9 BL=GPIO8
    let panel_config = PanelConfig::default();
    let spi_config = esp_hal::spi::master::Config::default()
        .with_frequency(Rate::from_hz(panel_config.spi_hz))
        .with_mode(esp_hal::spi::Mode::_0);
    let spi = match Spi::new(peripherals.SPI2, spi_config) {
        Ok(spi) => spi
            .with_sck(peripherals.GPIO12)
            .with_mosi(peripherals.GPIO11),
        Err(err) => {
            error!("display: spi config rejected: {:?}", err);
            halt("display bus unavailable").await
        }
    };
    let cs = Output::new(peripherals.GPIO10, Level::High, OutputConfig::default());
    let dc = Output::new(peripherals.GPIO9, Level::Low, OutputConfig::default());
    let backlight = Output::new(peripherals.GPIO8, Level::Low, OutputConfig::default());
    let Ok(spi_device) = ExclusiveDevice::new(spi, cs, Delay::new());

    let mut display = TftStatusDisplay::new(St7789::new(spi_device, dc, panel_config), backlight);
    if let Err(err) = display.init(&mut Delay::new()) {
        warn!("display: init failed: {:?}", err);
    }

    // Front button on GPIO0, pressed pulls low.
    let button_pin = Input::new(
        peripherals.GPIO0,
        InputConfig::default().with_pull(Pull::Up),
    );
    let mut button = match ButtonInput::new(button_pin, ButtonConfig::default().with_active_low(true)) {
        Ok(button) => button,
        Err(err) => {
            error!("button: init failed: {:?}", err);
            halt("button unavailable").await
        }
    };

    let radio = match esp_radio::init() {
        Ok(radio) => radio,
        Err(err) => {
            error!("wifi: esp-radio init failed: {:?}", err);
            halt("radio unavailable").await
        }
    };
    let (controller, interfaces) =
        match esp_radio::wifi::new(&radio, peripherals.WIFI, esp_radio::wifi::Config::default()) {
            Ok(parts) => parts,
            Err(err) => {
                error!("wifi: peripheral init failed: {:?}", err);
                halt("wifi unavailable").await
            }
        };

    let mut rng = HardwareRng::new(Rng::new());
    let seed = (u64::from(rng.next_u32()) << 32) | u64::from(rng.next_u32());
    let (station, mut station_runner) = embassy_net::new(
        interfaces.sta,
        station_config(),
        STATION_RESOURCES.init(StackResources::new()),
        seed,
    );
    let (access_point, mut ap_runner) = embassy_net::new(
        interfaces.ap,
        access_point_config(),
        AP_RESOURCES.init(StackResources::new()),
        seed ^ AP_SEED_SALT,
    );

    let parts = DeviceParts {
        eeprom,
        radio: EspWifiRadio::new(controller, station),
        credentials,
        display,
        files,
    };
    let device = RefCell::new(Device::new(
        parts,
        ConnectivityPolicy::default(),
        &mut rng,
        now_ms(),
    ));

    let mode = device.borrow_mut().start_network(now_ms());
    info!("wifi: started in {}", mode.as_str());

    let control_future = async {
        let mut boot_confirmed = false;
        loop {
            let now = now_ms();
            let restart_due = {
                let mut device = device.borrow_mut();
                let action = device.tick(now);

                if !device.network_busy() {
                    if !boot_confirmed {
                        device.confirm_boot((now / 1_000) as u32);
                        boot_confirmed = true;
                    }
                    match button.poll_event(now) {
                        Ok(Some(event)) => device.handle_input(event, now),
                        Ok(None) => {}
                        Err(err) => warn!("button: read failed: {:?}", err),
                    }
                }
                action == Action::Restart
            };

            if restart_due {
                Timer::after_millis(RESTART_GRACE_MS).await;
                restart();
            }
            Timer::after_millis(CONTROL_TICK_MS).await;
        }
    };

    let service_future = embassy_futures::join::join3(
        http::serve(station, &device, "sta"),
        http::serve(access_point, &device, "ap"),
        sntp::run(station, &device),
    );

    let _ = embassy_futures::join::join4(
        station_runner.run(),
        ap_runner.run(),
        control_future,
        service_future,
    )
    .await;
    unreachable!()
}
