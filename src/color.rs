// Named colors used by the machine states

pub use ledstripd_driver::Rgb;

pub const OFF: Rgb = Rgb::new(0, 0, 0);
pub const WHITE: Rgb = Rgb::new(255, 255, 255);
pub const RED: Rgb = Rgb::new(255, 0, 0);
pub const GREEN: Rgb = Rgb::new(0, 255, 0);
pub const BLUE: Rgb = Rgb::new(0, 0, 255);
pub const YELLOW: Rgb = Rgb::new(255, 200, 0);
pub const ORANGE: Rgb = Rgb::new(226, 83, 3);

/// Access-point pairing color.
pub const CHARTREUSE: Rgb = Rgb::new(150, 255, 0);

/// Barely-visible red left on the strip when the daemon exits.
pub const EXIT_RED: Rgb = Rgb::new(2, 0, 0);

/// Faint white used by the default listening glow.
pub fn listening_white() -> Rgb {
    WHITE.scale(0.05)
}
