pub const DUTY_MAX: u16 = 1023;

pub fn hsv_to_rgb(h: f64, s: f64, v: f64) -> (f64, f64, f64) {
    if s == 0.0 {
        return (v, v, v);
    }

    let sector = (h * 6.0).floor();
    let f = h * 6.0 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    match (sector as i64).rem_euclid(6) {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    }
}

pub fn rgb_to_hsv(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let degrees = if delta == 0.0 {
        0.0
    } else if max == r {
        (60.0 * ((g - b) / delta) + 360.0) % 360.0
    } else if max == g {
        (60.0 * ((b - r) / delta) + 120.0) % 360.0
    } else {
        (60.0 * ((r - g) / delta) + 240.0) % 360.0
    };

    let s = if max == 0.0 { 0.0 } else { delta / max };

    (degrees / 360.0, s, max)
}

pub fn apply_gamma(value: f64, gamma: f64) -> f64 {
    if gamma == 1.0 {
        return value;
    }
    ((value / f64::from(DUTY_MAX)).powf(gamma) * f64::from(DUTY_MAX)).round()
}

// Not a luminance normalization: dim channels are compressed harder than
// the dominant one.
pub fn normalize_brightness(r: f64, g: f64, b: f64) -> (f64, f64, f64) {
    let total = r + g + b;
    if total <= 0.0 {
        return (r, g, b);
    }
    (r * (r / total), g * (g / total), b * (b / total))
}
