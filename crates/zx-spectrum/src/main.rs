//! ZX Spectrum 48K presenter: a winit window backed by a `pixels` surface.
//!
//! This binary is a thin shell around [`zx_spectrum::System`]; all emulation
//! state and timing lives in the library. The binary's only jobs are
//! argument parsing, file loading, host-key → Spectrum-key mapping, and
//! pumping `step_chunk` between redraws.

use std::path::PathBuf;
use std::process;
use std::time::{Duration, Instant};

use pixels::{Pixels, SurfaceTexture};
use winit::application::ApplicationHandler;
use winit::event::{ElementState, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::window::{Window, WindowAttributes, WindowId};

use zx_spectrum::crt::{CRT_LINES, TOTAL_WIDTH};
use zx_spectrum::system::DEFAULT_CHUNK_T_STATES;
use zx_spectrum::{SpectrumConfig, SpectrumError, System};

/// Window scale factor.
const SCALE: u32 = 2;

/// Frame duration for 50 Hz PAL.
const FRAME_DURATION: Duration = Duration::from_micros(20_000);

/// Number of chunks per frame: `T_STATES_PER_FRAME / DEFAULT_CHUNK_T_STATES`.
const CHUNKS_PER_FRAME: u32 = 3;

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if let Err(e) = run(&args) {
        eprintln!("{e}");
        process::exit(1);
    }
}

struct CliArgs {
    rom_path: Option<PathBuf>,
    sna_path: Option<PathBuf>,
    scr_path: Option<PathBuf>,
    debug: bool,
}

fn parse_args(args: &[String]) -> Result<CliArgs, SpectrumError> {
    let mut cli = CliArgs {
        rom_path: None,
        sna_path: None,
        scr_path: None,
        debug: false,
    };

    for arg in args {
        match arg.as_str() {
            "-h" | "--help" => {
                print_usage();
                process::exit(0);
            }
            "-d" | "--debug" => cli.debug = true,
            other if other.ends_with(".rom") => cli.rom_path = Some(PathBuf::from(other)),
            other if other.ends_with(".sna") => cli.sna_path = Some(PathBuf::from(other)),
            other if other.ends_with(".scr") => cli.scr_path = Some(PathBuf::from(other)),
            other => return Err(SpectrumError::BadArgument(other.to_string())),
        }
    }

    Ok(cli)
}

fn print_usage() {
    eprintln!("Usage: zx-spectrum [OPTIONS] [FILE...]");
    eprintln!();
    eprintln!("Files are dispatched by suffix:");
    eprintln!("  <file>.rom   16 KiB ROM image, loaded at 0x0000");
    eprintln!("  <file>.sna   49,179-byte snapshot");
    eprintln!("  <file>.scr   6,912-byte screen dump, loaded at 0x4000");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -d, --debug   enable tracing");
    eprintln!("  -h, --help    print this message");
    eprintln!();
    eprintln!("If no ROM file is given, 48.rom is loaded from the current directory.");
}

fn run(args: &[String]) -> Result<(), SpectrumError> {
    let cli = parse_args(args)?;
    let system = make_system(&cli)?;

    let event_loop = EventLoop::new().map_err(|e| SpectrumError::PresenterInit(e.to_string()))?;
    let mut app = App::new(system, cli.debug);
    event_loop
        .run_app(&mut app)
        .map_err(|e| SpectrumError::PresenterInit(e.to_string()))
}

fn make_system(cli: &CliArgs) -> Result<System, SpectrumError> {
    let rom_path = cli
        .rom_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("48.rom"));
    let rom = std::fs::read(&rom_path)
        .map_err(|e| SpectrumError::FileNotFound(rom_path.clone(), e))?;

    let mut system = System::new(&SpectrumConfig::new(rom));

    if let Some(path) = &cli.sna_path {
        let data = std::fs::read(path)
            .map_err(|e| SpectrumError::FileNotFound(path.clone(), e))?;
        system.load_sna(&data)?;
        eprintln!("Loaded SNA: {}", path.display());
    }

    if let Some(path) = &cli.scr_path {
        system.load_scr_file(path)?;
        eprintln!("Loaded SCR: {}", path.display());
    }

    Ok(system)
}

/// Host scancode → `(row, bit_mask)` for the 48K keyboard matrix. Keys with
/// no Spectrum equivalent map to `None`.
fn map_keycode(key: KeyCode) -> Option<(usize, u8)> {
    match key {
        KeyCode::ShiftLeft => Some((0, 0x01)), // CAPS SHIFT
        KeyCode::KeyZ => Some((0, 0x02)),
        KeyCode::KeyX => Some((0, 0x04)),
        KeyCode::KeyC => Some((0, 0x08)),
        KeyCode::KeyV => Some((0, 0x10)),

        KeyCode::KeyA => Some((1, 0x01)),
        KeyCode::KeyS => Some((1, 0x02)),
        KeyCode::KeyD => Some((1, 0x04)),
        KeyCode::KeyF => Some((1, 0x08)),
        KeyCode::KeyG => Some((1, 0x10)),

        KeyCode::KeyQ => Some((2, 0x01)),
        KeyCode::KeyW => Some((2, 0x02)),
        KeyCode::KeyE => Some((2, 0x04)),
        KeyCode::KeyR => Some((2, 0x08)),
        KeyCode::KeyT => Some((2, 0x10)),

        KeyCode::Digit1 => Some((3, 0x01)),
        KeyCode::Digit2 => Some((3, 0x02)),
        KeyCode::Digit3 => Some((3, 0x04)),
        KeyCode::Digit4 => Some((3, 0x08)),
        KeyCode::Digit5 => Some((3, 0x10)),

        KeyCode::Digit0 => Some((4, 0x01)),
        KeyCode::Digit9 => Some((4, 0x02)),
        KeyCode::Digit8 => Some((4, 0x04)),
        KeyCode::Digit7 => Some((4, 0x08)),
        KeyCode::Digit6 => Some((4, 0x10)),

        KeyCode::KeyP => Some((5, 0x01)),
        KeyCode::KeyO => Some((5, 0x02)),
        KeyCode::KeyI => Some((5, 0x04)),
        KeyCode::KeyU => Some((5, 0x08)),
        KeyCode::KeyY => Some((5, 0x10)),

        KeyCode::Enter => Some((6, 0x01)),
        KeyCode::KeyL => Some((6, 0x02)),
        KeyCode::KeyK => Some((6, 0x04)),
        KeyCode::KeyJ => Some((6, 0x08)),
        KeyCode::KeyH => Some((6, 0x10)),

        KeyCode::Space => Some((7, 0x01)),
        KeyCode::ShiftRight | KeyCode::ControlLeft | KeyCode::ControlRight => Some((7, 0x02)), // SYM SHIFT
        KeyCode::KeyM => Some((7, 0x04)),
        KeyCode::KeyN => Some((7, 0x08)),
        KeyCode::KeyB => Some((7, 0x10)),

        _ => None,
    }
}

struct App {
    system: System,
    debug: bool,
    window: Option<&'static Window>,
    pixels: Option<Pixels<'static>>,
    last_frame_time: Instant,
}

impl App {
    fn new(system: System, debug: bool) -> Self {
        Self {
            system,
            debug,
            window: None,
            pixels: None,
            last_frame_time: Instant::now(),
        }
    }

    fn handle_key(&mut self, keycode: KeyCode, pressed: bool) {
        let Some((row, mask)) = map_keycode(keycode) else {
            return;
        };
        if pressed {
            self.system.key_press(row, mask);
        } else {
            self.system.key_release(row, mask);
        }
    }

    fn update_pixels(&mut self) {
        let Some(pixels) = self.pixels.as_mut() else {
            return;
        };
        let fb = self.system.framebuffer();
        let frame = pixels.frame_mut();
        for (i, &rgba) in fb.iter().enumerate() {
            let offset = i * 4;
            frame[offset] = (rgba >> 24) as u8;
            frame[offset + 1] = (rgba >> 16) as u8;
            frame[offset + 2] = (rgba >> 8) as u8;
            frame[offset + 3] = rgba as u8;
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_size =
            winit::dpi::LogicalSize::new(TOTAL_WIDTH as u32 * SCALE, CRT_LINES as u32 / 2 * SCALE);
        let attrs = WindowAttributes::default()
            .with_title("zx-spectrum")
            .with_inner_size(window_size)
            .with_resizable(false);

        match event_loop.create_window(attrs) {
            Ok(window) => {
                // The window lives for the process lifetime; the OS reclaims
                // it on exit.
                let window: &'static Window = Box::leak(Box::new(window));
                let inner = window.inner_size();
                let surface = SurfaceTexture::new(inner.width, inner.height, window);
                match Pixels::new(TOTAL_WIDTH as u32, CRT_LINES as u32, surface) {
                    Ok(pixels) => self.pixels = Some(pixels),
                    Err(e) => {
                        eprintln!("Failed to create pixels surface: {e}");
                        event_loop.exit();
                        return;
                    }
                }
                self.window = Some(window);
            }
            Err(e) => {
                eprintln!("Failed to create window: {e}");
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => event_loop.exit(),
            WindowEvent::KeyboardInput { event, .. } => {
                if let PhysicalKey::Code(keycode) = event.physical_key {
                    if keycode == KeyCode::Escape && event.state == ElementState::Pressed {
                        event_loop.exit();
                        return;
                    }
                    self.handle_key(keycode, event.state == ElementState::Pressed);
                }
            }
            WindowEvent::RedrawRequested => {
                let now = Instant::now();
                if now.duration_since(self.last_frame_time) >= FRAME_DURATION {
                    for _ in 0..CHUNKS_PER_FRAME {
                        self.system.step_chunk(DEFAULT_CHUNK_T_STATES);
                    }
                    if self.debug {
                        eprintln!("pc={:#06X}", self.system.cpu().regs.pc);
                    }
                    self.update_pixels();
                    self.last_frame_time = now;
                }

                if let Some(pixels) = self.pixels.as_ref() {
                    if let Err(e) = pixels.render() {
                        eprintln!("Render error: {e}");
                        event_loop.exit();
                    }
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window {
            window.request_redraw();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, data: &[u8]) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("zx-spectrum-test-{}-{name}", process::id()));
        std::fs::write(&path, data).unwrap();
        path
    }

    #[test]
    fn unknown_argument_is_a_bad_argument() {
        let err = parse_args(&["--nonsense".to_string()]).unwrap_err();
        assert!(matches!(err, SpectrumError::BadArgument(arg) if arg == "--nonsense"));
    }

    #[test]
    fn missing_rom_file_is_file_not_found() {
        let cli = parse_args(&["does-not-exist.rom".to_string()]).unwrap();
        let err = make_system(&cli).unwrap_err();
        assert!(matches!(err, SpectrumError::FileNotFound(path, _) if path.ends_with("does-not-exist.rom")));
    }

    #[test]
    fn rom_then_sna_then_scr_load_in_order() {
        use zx_spectrum::Observable;

        let rom_path = write_temp("48.rom", &[0u8; 0x4000]);

        let mut sna = vec![0u8; 49_179];
        sna[27] = 0x11; // first RAM byte at 0x4000, overwritten by the .scr below
        let sna_path = write_temp("snap.sna", &sna);

        let mut scr = vec![0u8; 6912];
        scr[0] = 0xAA;
        let scr_path = write_temp("screen.scr", &scr);

        let args = vec![
            rom_path.to_str().unwrap().to_string(),
            sna_path.to_str().unwrap().to_string(),
            scr_path.to_str().unwrap().to_string(),
        ];
        let cli = parse_args(&args).unwrap();
        let system = make_system(&cli).unwrap();

        // The SCR load happens after the SNA load, so it must win: the first
        // screen byte reflects the .scr payload, not whatever the snapshot's
        // RAM region held.
        assert_eq!(system.query("memory.0x4000"), Some(zx_spectrum::Value::U8(0xAA)));

        std::fs::remove_file(rom_path).unwrap();
        std::fs::remove_file(sna_path).unwrap();
        std::fs::remove_file(scr_path).unwrap();
    }
}
