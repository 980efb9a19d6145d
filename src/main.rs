#![no_main]
#![no_std]

use cfg_if::cfg_if;
use cortex_m::asm;
use defmt::println;
use defmt_rtt as _;
use panic_probe as _;

use hal::{
    clocks::{Clocks, InputSrc, PllSrc},
    flash::{Bank, Flash},
    gpio::{Pin, Port},
    pac,
    timer::{Timer, TimerConfig, TimerInterrupt},
    usart::{Usart, UsartConfig, UsartInterrupt},
};
use usb_device::{bus::UsbBusAllocator, prelude::*};
use usbd_hid::descriptor::generator_prelude::SerializedDescriptor;
use usbd_hid::hid_class::HIDClass;

use rcjoy::arbiter::Arbiter;
use rcjoy::capture_timer::{CaptureTimer, CompareChannel};
use rcjoy::config::{self, Configuration, EepromStorage};
use rcjoy::decoders::pcm::PcmDecoder;
use rcjoy::decoders::ppm::PpmDecoder;
use rcjoy::decoders::srxl::SrxlDecoder;
use rcjoy::decoders::SignalSource;
use rcjoy::hid::{ConfigRequest, UsbEnhancedReport, UsbReport, REPORT_CHANNELS};

cfg_if! {
    if #[cfg(feature = "h7")] {
        use hal::usb_otg::{Usb1, Usb1BusType as UsbBusType};
        pub use pac::{USART2 as UART_SRXL, TIM2, TIM3, TIM16};
    } else if #[cfg(feature = "g4")] {
        use hal::usb::{self, UsbBusType};
        pub use pac::{USART2 as UART_SRXL, TIM2, TIM3, TIM16};
    }
}

static mut USB_BUS: Option<UsbBusAllocator<UsbBusType>> = None;
#[cfg(feature = "h7")]
static mut USB_EP_MEMORY: [u32; 1024] = [0; 1024];

// Byte offset in the on-chip flash sector reserved for `Configuration`
// (ground: `FLASH_CFG_SECTOR`/`FLASH_CFG_PAGE` split, generalized from the
// original's EEPROM offset to an on-chip flash page/sector).
cfg_if! {
    if #[cfg(feature = "h7")] {
        const FLASH_CFG_SECTOR: usize = 6;
    } else {
        const FLASH_CFG_PAGE: usize = 126;
    }
}

/// 1 ms task-tick rate every decoder's `run_task` is driven at.
const TASK_TICK_RATE_HZ: f32 = 1_000.;

/// Flash-backed [`EepromStorage`], reading/writing the reserved config
/// sector/page as raw bytes. Ground: `Flash::read`/`erase_write_page` used
/// elsewhere in `init` for the same on-chip flash peripheral.
struct FlashStorage<'a> {
    flash: &'a mut Flash,
}

impl EepromStorage for FlashStorage<'_> {
    fn read(&self, offset: usize, buf: &mut [u8]) {
        cfg_if! {
            if #[cfg(feature = "h7")] {
                self.flash.read(Bank::B1, FLASH_CFG_SECTOR, offset, buf);
            } else {
                self.flash.read(Bank::B1, FLASH_CFG_PAGE, offset, buf);
            }
        }
    }

    fn write(&mut self, offset: usize, buf: &[u8]) {
        cfg_if! {
            if #[cfg(feature = "h7")] {
                self.flash.erase_write_page(Bank::B1, FLASH_CFG_SECTOR, buf).ok();
            } else {
                self.flash.erase_write_page(Bank::B1, FLASH_CFG_PAGE, buf).ok();
            }
        }
        let _ = offset;
    }
}

/// [`CaptureTimer`] backed by TIM2's input-capture/compare unit. Stateless:
/// every method reads or writes the peripheral's registers directly, so
/// cloning this handle is free and every decoder that shares the physical
/// receiver pin can hold its own copy (ground: the raw
/// `unsafe { (*pac::TIM15::ptr())... }` register pokes used elsewhere in
/// this codebase, since `hal` has no input-capture wrapper).
#[derive(Clone, Copy, Default)]
struct EdgeCaptureTimer;

impl CaptureTimer for EdgeCaptureTimer {
    fn now(&self) -> u16 {
        unsafe { (*TIM2::ptr()).cnt.read().cnt().bits() as u16 }
    }

    fn schedule_compare(&mut self, channel: CompareChannel, at_tick: u16) {
        let tim = unsafe { &*TIM2::ptr() };
        match channel {
            CompareChannel::A => tim.ccr1.write(|w| unsafe { w.ccr().bits(at_tick) }),
            CompareChannel::B => tim.ccr2.write(|w| unsafe { w.ccr().bits(at_tick) }),
            CompareChannel::C => tim.ccr3.write(|w| unsafe { w.ccr().bits(at_tick) }),
        }
    }

    fn set_capture_edge(&mut self, rising: bool) {
        unsafe { (*TIM2::ptr()).ccer.modify(|_, w| w.cc4p().bit(!rising)) };
    }

    fn last_capture(&self) -> u16 {
        unsafe { (*TIM2::ptr()).ccr4.read().ccr().bits() as u16 }
    }
}

/// [`CaptureTimer`] for SRXL's own sync-pause compare channel on TIM3. SRXL
/// never captures edges off the timer itself — its data comes from the UART
/// byte stream — so `last_capture`/`set_capture_edge` are unused but kept to
/// satisfy the shared trait.
#[derive(Clone, Copy, Default)]
struct SrxlCompareTimer;

impl CaptureTimer for SrxlCompareTimer {
    fn now(&self) -> u16 {
        unsafe { (*TIM3::ptr()).cnt.read().cnt().bits() as u16 }
    }

    fn schedule_compare(&mut self, channel: CompareChannel, at_tick: u16) {
        let tim = unsafe { &*TIM3::ptr() };
        match channel {
            CompareChannel::A => tim.ccr1.write(|w| unsafe { w.ccr().bits(at_tick) }),
            CompareChannel::B => tim.ccr2.write(|w| unsafe { w.ccr().bits(at_tick) }),
            CompareChannel::C => tim.ccr3.write(|w| unsafe { w.ccr().bits(at_tick) }),
        }
    }

    fn set_capture_edge(&mut self, _rising: bool) {}

    fn last_capture(&self) -> u16 {
        0
    }
}

#[rtic::app(device = pac, peripherals = false, dispatchers = [EXTI9_5])]
mod app {
    use super::*;

    #[shared]
    struct Shared {
        ppm: PpmDecoder<EdgeCaptureTimer>,
        pcm: PcmDecoder<EdgeCaptureTimer>,
        srxl: SrxlDecoder<SrxlCompareTimer>,
        arbiter: Arbiter,
        config: Configuration,
        usb_dev: UsbDevice<'static, UsbBusType>,
        hid_joystick: HIDClass<'static, UsbBusType>,
        flash_onboard: Flash,
    }

    #[local]
    struct Local {
        uart_srxl: Usart<UART_SRXL>,
        task_tick_timer: Timer<TIM16>,
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local, init::Monotonics) {
        let mut cp = cx.core;
        let mut dp = pac::Peripherals::take().unwrap();

        cp.SCB.enable_icache();

        cfg_if! {
            if #[cfg(feature = "h7")] {
                let clock_cfg = Clocks {
                    pll_src: PllSrc::Hse(16_000_000),
                    hsi48_on: true,
                    usb_src: hal::clocks::UsbSrc::Hsi48,
                    ..Clocks::full_speed()
                };
            } else {
                let clock_cfg = Clocks {
                    input_src: InputSrc::Pll(PllSrc::Hse(16_000_000)),
                    hsi48_on: true,
                    clk48_src: hal::clocks::Clk48Src::Hsi48,
                    ..Default::default()
                };
            }
        }
        clock_cfg.setup().unwrap();

        // Receiver signal pin: edge-capture on TIM2 CH4.
        let _signal_pin = Pin::new(Port::A, 3, hal::gpio::PinMode::Alt(1));
        dp.TIM2
            .ccmr2_input()
            .modify(|_, w| unsafe { w.cc4s().bits(0b01) });
        dp.TIM2.ccer.modify(|_, w| w.cc4e().set_bit());
        dp.TIM2.dier.modify(|_, w| w.cc4ie().set_bit().cc2ie().set_bit());
        dp.TIM2.cr1.modify(|_, w| w.cen().set_bit());

        // SRXL's own sync-pause / inactivity compares, on a separate timer so
        // they never race TIM2's capture interrupt.
        dp.TIM3.dier.modify(|_, w| w.cc3ie().set_bit());
        dp.TIM3.cr1.modify(|_, w| w.cen().set_bit());

        let mut flash_onboard = Flash::new(dp.FLASH);
        let config = {
            let storage = FlashStorage {
                flash: &mut flash_onboard,
            };
            config::load_or_default(&storage)
        };

        let mut ppm = PpmDecoder::new(EdgeCaptureTimer);
        ppm.set_configuration(config.min_sync_pulse_width_us, config.is_input_polarity_inverted());
        let pcm = PcmDecoder::new(EdgeCaptureTimer);
        let srxl = SrxlDecoder::new(SrxlCompareTimer);
        let arbiter = Arbiter::new();

        let mut task_tick_timer = Timer::new_tim16(dp.TIM16, TASK_TICK_RATE_HZ, Default::default(), &clock_cfg);
        task_tick_timer.enable_interrupt(TimerInterrupt::Update);
        task_tick_timer.enable();

        let uart_srxl = Usart::new(
            dp.USART2,
            115_200,
            UsartConfig::default(),
            &clock_cfg,
        );

        cfg_if! {
            if #[cfg(feature = "h7")] {
                let usb = Usb1::new(
                    dp.OTG1_HS_GLOBAL,
                    dp.OTG1_HS_DEVICE,
                    dp.OTG1_HS_PWRCLK,
                    clock_cfg.hclk(),
                );
                unsafe { USB_BUS = Some(UsbBusType::new(usb, &mut USB_EP_MEMORY)) };
            } else {
                let usb = usb::Peripheral { regs: dp.USB };
                unsafe { USB_BUS = Some(usb::UsbBus::new(usb)) };
            }
        }

        let hid_joystick = HIDClass::new(
            unsafe { USB_BUS.as_ref().unwrap() },
            rcjoy::hid::UsbReport::desc(),
            10,
        );

        let usb_dev = UsbDeviceBuilder::new(unsafe { USB_BUS.as_ref().unwrap() }, UsbVidPid(0x16c0, 0x27dd))
            .manufacturer("rcjoy")
            .product("R/C to USB HID joystick bridge")
            .serial_number("RJ")
            .device_class(0)
            .build();

        println!("rcjoy firmware initialized");

        (
            Shared {
                ppm,
                pcm,
                srxl,
                arbiter,
                config,
                usb_dev,
                hid_joystick,
                flash_onboard,
            },
            Local {
                uart_srxl,
                task_tick_timer,
            },
            init::Monotonics(),
        )
    }

    /// Foreground loop: polls the arbiter and emits HID reports. The
    /// decoders themselves only ever run from ISR context.
    #[idle(shared = [ppm, pcm, srxl, arbiter, config, hid_joystick])]
    fn idle(mut cx: idle::Context) -> ! {
        loop {
            let mut joystick_report = [0u8; REPORT_CHANNELS];
            let mut enhanced = None;

            (
                cx.shared.ppm,
                cx.shared.pcm,
                cx.shared.srxl,
                cx.shared.arbiter,
                cx.shared.config,
            )
                .lock(|ppm, pcm, srxl, arbiter, config| {
                    arbiter.update(ppm, srxl, pcm, config, &mut joystick_report);

                    if ppm.has_new_data() || pcm.has_new_data() || srxl.has_new_data() {
                        let mut widths = [0u16; REPORT_CHANNELS];
                        for (i, width) in widths.iter_mut().enumerate() {
                            *width = match arbiter.active_source() {
                                SignalSource::Ppm => ppm.get_channel_pulse_width(i as u8),
                                SignalSource::Srxl => srxl.get_channel_pulse_width(i as u8),
                                _ => 0,
                            };
                        }
                        enhanced = Some(UsbEnhancedReport::new(
                            arbiter.active_source(),
                            arbiter.channel_count(),
                            widths,
                        ));

                        ppm.clear_new_data();
                        pcm.clear_new_data();
                        srxl.clear_new_data();
                    }
                });

            cx.shared.hid_joystick.lock(|hid_joystick| {
                hid_joystick.push_input(&UsbReport { channels: joystick_report }).ok();
                if let Some(report) = enhanced {
                    hid_joystick.push_raw_input(&report.to_bytes()).ok();
                }
            });

            asm::nop();
        }
    }

    /// TIM2 covers both the input-capture interrupt (a receiver edge
    /// arrived) and PPM's sync-pause compare match (CC2) on the same NVIC
    /// vector, matching this codebase's habit of handling several related
    /// flags in one ISR (cf. `update_isr`'s `TIM1_BRK_TIM15` binding).
    #[task(binds = TIM2, shared = [ppm, pcm], priority = 6)]
    fn on_tim2(mut cx: on_tim2::Context) {
        let sr = unsafe { (*TIM2::ptr()).sr.read() };

        if sr.cc4if().bit_is_set() {
            unsafe { (*TIM2::ptr()).sr.modify(|_, w| w.cc4if().clear_bit()) };
            (cx.shared.ppm, cx.shared.pcm).lock(|ppm, pcm| {
                ppm.on_input_capture();
                pcm.on_input_capture();
            });
        }

        if sr.cc2if().bit_is_set() {
            unsafe { (*TIM2::ptr()).sr.modify(|_, w| w.cc2if().clear_bit()) };
            cx.shared.ppm.lock(|ppm| ppm.on_sync_pause());
        }
    }

    /// TIM3 CC3 is SRXL's 5 ms inter-byte sync-pause compare.
    #[task(binds = TIM3, shared = [srxl], priority = 6)]
    fn on_tim3(mut cx: on_tim3::Context) {
        let sr = unsafe { (*TIM3::ptr()).sr.read() };

        if sr.cc3if().bit_is_set() {
            unsafe { (*TIM3::ptr()).sr.modify(|_, w| w.cc3if().clear_bit()) };
            cx.shared.srxl.lock(|srxl| srxl.on_sync_pause());
        }
    }

    /// 1 ms task tick: runs every decoder's inter-frame timeout check.
    #[task(binds = TIM1_BRK_TIM15, shared = [ppm, pcm, srxl], local = [task_tick_timer], priority = 3)]
    fn on_task_tick(mut cx: on_task_tick::Context) {
        cx.local.task_tick_timer.clear_interrupt(TimerInterrupt::Update);

        (cx.shared.ppm, cx.shared.pcm, cx.shared.srxl).lock(|ppm, pcm, srxl| {
            ppm.run_task();
            pcm.run_task();
            srxl.run_task();
        });
    }

    /// SRXL byte-at-a-time UART reception.
    #[task(binds = USART2, shared = [srxl], local = [uart_srxl], priority = 5)]
    fn on_uart_byte(mut cx: on_uart_byte::Context) {
        let uart = &mut cx.local.uart_srxl;
        uart.clear_interrupt(UsartInterrupt::ReadNotEmpty);

        if let Ok(byte) = uart.read_one() {
            cx.shared.srxl.lock(|srxl| srxl.on_byte_received(byte));
        }
    }

    /// USB control/feature-report handling: load/save configuration,
    /// restore defaults, jump to bootloader.
    #[task(binds = USB_LP, shared = [usb_dev, hid_joystick, config, flash_onboard, ppm], priority = 4)]
    fn on_usb(mut cx: on_usb::Context) {
        (
            cx.shared.usb_dev,
            cx.shared.hid_joystick,
            cx.shared.config,
            cx.shared.flash_onboard,
            cx.shared.ppm,
        )
            .lock(|usb_dev, hid_joystick, config, flash_onboard, ppm| {
                if !usb_dev.poll(&mut [hid_joystick]) {
                    return;
                }

                let mut buf = [0u8; 64];
                match hid_joystick.pull_raw_output(&mut buf) {
                    Ok(count) if count > 0 => handle_config_request(buf[0], config, flash_onboard, ppm),
                    _ => {}
                }
            });
    }
}

/// Dispatches one feature-report command byte. Ground:
/// `original_source/firmware/Receiver.h`'s control-transfer handling,
/// generalized over the [`EepromStorage`] abstraction.
fn handle_config_request(
    command: u8,
    config: &mut Configuration,
    flash_onboard: &mut Flash,
    ppm: &mut PpmDecoder<EdgeCaptureTimer>,
) {
    let Some(request) = ConfigRequest::decode(command) else {
        defmt::warn!("USB: unrecognized configuration command {}", command);
        return;
    };

    let mut storage = FlashStorage { flash: flash_onboard };

    match request {
        ConfigRequest::ReadConfiguration => {
            *config = config::load_or_default(&storage);
        }
        ConfigRequest::WriteConfiguration => {
            if config.is_valid() {
                config::save(&mut storage, config);
                ppm.set_configuration(config.min_sync_pulse_width_us, config.is_input_polarity_inverted());
            } else {
                defmt::warn!("USB: rejected invalid configuration write");
            }
        }
        ConfigRequest::LoadDefaults => {
            *config = Configuration::default();
            config::save(&mut storage, config);
            ppm.set_configuration(config.min_sync_pulse_width_us, config.is_input_polarity_inverted());
        }
        ConfigRequest::JumpToBootloader => {
            cortex_m::peripheral::SCB::sys_reset();
        }
    }
}

// same panicking *behavior* as `panic-probe` but doesn't print a panic message
// this prevents the panic message being printed *twice* when `defmt::panic` is invoked
#[defmt::panic_handler]
fn panic() -> ! {
    cortex_m::asm::udf()
}
