#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use embassy_executor::Spawner;
use embassy_time::{Duration, Instant, Timer};
use esp_backtrace as _; // Register the panic handler.
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Level, Output, OutputConfig, Pull};
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::Uart;
use esp_println as _; // Register the defmt UART global logger.

use pm25::capability::{self, PROP_DUST_LEVEL, PROP_FINE_DUST_LEVEL, RES_DUST_SENSOR};
use pm25::config::CONFIG;
use pm25::sensors::{IoTransport, Poller, ReadingStore, SerialReader};
use pm25::watchdog::Watchdog;

// This creates a default app-descriptor required by the esp-idf bootloader.
esp_bootloader_esp_idf::esp_app_desc!();

/// Latest validated reading, shared by the poller and every reader.
static READINGS: ReadingStore = ReadingStore::new();

#[embassy_executor::task]
async fn sensor_task(uart: Uart<'static, esp_hal::Async>) -> ! {
    Poller::new(uart, CONFIG.sensor).run(&READINGS).await
}

/// PMS7003 through the blocking UART and the "not ready" retry path.
type SerialSensor = SerialReader<IoTransport<Uart<'static, esp_hal::Blocking>>, Delay>;

#[embassy_executor::task]
async fn serial_sensor_task(reader: SerialSensor) -> ! {
    Poller::new(reader, CONFIG.sensor).run_blocking(&READINGS).await
}

#[embassy_executor::task]
async fn watchdog_task(watchdog: Watchdog<Output<'static>, Delay>) -> ! {
    watchdog.run(&READINGS).await
}

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    defmt::info!("Init...");

    let reset_reason = esp_hal::system::reset_reason();
    defmt::info!("Reset Reason: {:?}", defmt::Debug2Format(&reset_reason));

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    // Only the RTOS needs heap; the sensor path is allocation-free.
    esp_alloc::heap_allocator!(size: 16 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    let sw_int =
        esp_hal::interrupt::software::SoftwareInterruptControl::new(peripherals.SW_INTERRUPT);
    esp_rtos::start(timg0.timer0, sw_int.software_interrupt0);

    defmt::info!("RTOS scheduler initialized");

    // External Watchdog (TPL5010) DONE pin on GPIO2.
    let watchdog_pin = Output::new(
        peripherals.GPIO2,
        Level::Low,
        OutputConfig::default().with_pull(Pull::Down),
    );
    let Ok(watchdog) = Watchdog::new(watchdog_pin, Delay::new(), CONFIG.watchdog, Instant::now());

    // PMS7003 on UART0: 9600 8N1, sensor TX -> GPIO20.
    let uart_config = esp_hal::uart::Config::default().with_baudrate(CONFIG.uart.baudrate);
    let uart = Uart::new(peripherals.UART0, uart_config)
        .expect("Failed to configure PMS7003 UART")
        .with_rx(peripherals.GPIO20)
        .with_tx(peripherals.GPIO21);

    match CONFIG.sensor.read_mode {
        Some(mode) => {
            defmt::info!("PMS7003 read mode: {:?}", mode);
            let reader =
                SerialReader::new(IoTransport::new(uart), Delay::new(), mode, CONFIG.sensor.retry);
            spawner.must_spawn(serial_sensor_task(reader));
        }
        None => spawner.must_spawn(sensor_task(uart.into_async())),
    }
    spawner.must_spawn(watchdog_task(watchdog));

    loop {
        if CONFIG.print_status_loop {
            let uptime = Instant::now().as_secs();
            let stats = esp_alloc::HEAP.stats();
            let health = READINGS.status().health;

            match capability::handle_get_request(
                &READINGS,
                RES_DUST_SENSOR,
                &[PROP_DUST_LEVEL, PROP_FINE_DUST_LEVEL],
            ) {
                Ok(rep) => defmt::info!(
                    "[{}s] {} | frames: {} ok, {} bad checksum, {} transport | Heap: {}/{}",
                    uptime,
                    defmt::Display2Format(&rep),
                    health.frames_ok,
                    health.checksum_failures,
                    health.transport_failures,
                    stats.current_usage,
                    stats.size
                ),
                Err(e) => defmt::warn!("Status request failed: {:?}", e),
            }
        }

        Timer::after(Duration::from_secs(1)).await;
    }
}
