use rand::Rng;

use crate::error::{ Error, Result };


#[inline]
pub fn check_dims(context: &str, expected: &[usize], found: &[usize]) -> Result<()> {
  if expected == found {
    Ok(())
  } else {
    Err(Error::shape(context, expected, found))
  }
}


// Polar Box-Muller transformation

pub fn randn() -> (f64, f64) {
  let mut rng = rand::thread_rng();
  loop {
    let u: f64 = rng.gen_range(-1.0, 1.0);
    let v: f64 = rng.gen_range(-1.0, 1.0);
    let r = u * u + v * v;
    // Try again if outside interval
    if r == 0.0 || r >= 1.0 { continue }
    let c = (-2.0 * r.ln() / r).sqrt();
    return (u * c, v * c)
  }
}
