// SPDX-License-Identifier: CEPL-1.0
//! The placeholder content: a rectangle bouncing between the client edges.

use crate::ClearRect;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BouncingRect {
    x: f32,
    velocity: f32,
    width: u32,
    height: u32,
}

impl BouncingRect {
    /// Starts at the left edge moving at `velocity` pixels per second.
    pub fn new(width: u32, height: u32, velocity: f32) -> Self {
        Self::at(0.0, velocity, width, height)
    }

    pub fn at(x: f32, velocity: f32, width: u32, height: u32) -> Self {
        Self {
            x,
            velocity,
            width,
            height,
        }
    }

    pub fn x(&self) -> f32 {
        self.x
    }

    pub fn velocity(&self) -> f32 {
        self.velocity
    }

    /// Advances by `velocity * dt`. A step that would leave
    /// `[0, client_width]` flips the velocity and keeps `x` for this frame.
    /// Returns whether a bounce happened.
    pub fn step(&mut self, dt: f32, client_width: u32) -> bool {
        let next = self.x + self.velocity * dt;
        if next < 0.0 || next + self.width as f32 > client_width as f32 {
            self.velocity = -self.velocity;
            true
        } else {
            self.x = next;
            false
        }
    }

    /// Rectangle occupied at the current position, top edge at mid-height.
    pub fn rect(&self, client_height: u32) -> ClearRect {
        let left = self.x.round() as i32;
        let top = (client_height / 2) as i32;
        ClearRect {
            left,
            top,
            right: left + self.width as i32,
            bottom: top + self.height as i32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_inside_bounds_advances() {
        let mut r = BouncingRect::at(0.0, 256.0, 128, 128);
        assert!(!r.step(0.016, 960));
        assert!((r.x() - 4.096).abs() < 1e-4);
        assert_eq!(r.velocity(), 256.0);
    }

    #[test]
    fn step_past_right_edge_reflects_in_place() {
        let mut r = BouncingRect::at(850.0, 256.0, 128, 128);
        assert!(r.step(1.0, 960));
        assert_eq!(r.x(), 850.0);
        assert_eq!(r.velocity(), -256.0);
    }

    #[test]
    fn step_past_left_edge_reflects_in_place() {
        let mut r = BouncingRect::at(2.0, -256.0, 128, 128);
        assert!(r.step(0.016, 960));
        assert_eq!(r.x(), 2.0);
        assert_eq!(r.velocity(), 256.0);

        assert!(!r.step(0.016, 960));
        assert!(r.x() > 2.0);
    }

    #[test]
    fn touching_right_edge_is_in_bounds() {
        let mut r = BouncingRect::at(816.0, 256.0, 128, 128);
        assert!(!r.step(0.0625, 960));
        assert_eq!(r.x(), 832.0);
    }

    #[test]
    fn one_bounce_per_step() {
        // Narrower than the rect: every step bounces, never wraps.
        let mut r = BouncingRect::at(0.0, 256.0, 128, 128);
        for _ in 0..4 {
            assert!(r.step(0.016, 100));
            assert_eq!(r.x(), 0.0);
        }
    }

    #[test]
    fn rect_sits_at_half_height() {
        let r = BouncingRect::at(10.4, 256.0, 128, 128);
        let rect = r.rect(540);
        assert_eq!(
            rect,
            ClearRect {
                left: 10,
                top: 270,
                right: 138,
                bottom: 398
            }
        );
    }
}
