//! Projectile emission
//!
//! Every pattern reduces to [`World::fire_shot`]: take an instance from the
//! shot template's pool, place it relative to the firer, and give it speed,
//! heading and optional acceleration/turn. Aggregate patterns (fans, rings,
//! lines) are loops over single shots.

use glam::Vec2;
use serde::{Deserialize, Serialize};

use super::pool::{Handle, TemplateId};
use super::world::{Act, World};
use crate::direction;
use crate::error::{Error, Result};

/// Where a shot appears relative to its firer
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum Offset {
    /// The firer's template fire radius along the shot angle
    #[default]
    FireRadius,
    /// An explicit radius along the shot angle
    Radius(f32),
    /// A long offset along its own angle, then a short one along the shot angle
    Composed {
        long_radius: f32,
        long_angle: f32,
        short_radius: f32,
    },
}

/// Parameters of one projectile
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    pub speed: f32,
    /// Degrees; relative to the target direction when `aimed`
    pub angle: f32,
    /// (acceleration, speed limit)
    pub acceleration: Option<(f32, f32)>,
    /// (angular acceleration, angular speed limit)
    pub turn: Option<(f32, f32)>,
    pub offset: Offset,
    pub aimed: bool,
}

impl Shot {
    pub fn new(speed: f32, angle: f32) -> Self {
        Self {
            speed,
            angle,
            acceleration: None,
            turn: None,
            offset: Offset::FireRadius,
            aimed: false,
        }
    }

    pub fn radius(mut self, radius: f32) -> Self {
        self.offset = Offset::Radius(radius);
        self
    }

    pub fn composed(mut self, long_radius: f32, long_angle: f32, short_radius: f32) -> Self {
        self.offset = Offset::Composed {
            long_radius,
            long_angle,
            short_radius,
        };
        self
    }

    pub fn accel(mut self, acceleration: f32, speed_limit: f32) -> Self {
        self.acceleration = Some((acceleration, speed_limit));
        self
    }

    pub fn turn(mut self, angular_acceleration: f32, angular_speed_limit: f32) -> Self {
        self.turn = Some((angular_acceleration, angular_speed_limit));
        self
    }

    /// Add the direction toward the world target to `angle`
    pub fn aimed(mut self) -> Self {
        self.aimed = true;
        self
    }

    fn with_speed_angle(mut self, speed: f32, angle: f32) -> Self {
        self.speed = speed;
        self.angle = angle;
        self
    }
}

/// Angles of a fan of `way` shots spaced `interval` apart, centred on `angle`
pub fn fan_angles(angle: f32, way: u32, interval: f32) -> impl Iterator<Item = f32> {
    let first = angle - interval * way.saturating_sub(1) as f32 / 2.0;
    (0..way).map(move |k| first + interval * k as f32)
}

/// Angles of `n` shots evenly spaced around a full turn starting at `angle`
pub fn ring_angles(angle: f32, n: u32) -> impl Iterator<Item = f32> {
    let step = 360.0 / n.max(1) as f32;
    (0..n).map(move |k| angle + step * k as f32)
}

impl World {
    /// Fire one projectile of `template` from the active entity `from`
    pub fn fire_shot(&mut self, from: Handle, template: TemplateId, shot: &Shot) -> Result<Handle> {
        let Some(firer) = self.body(from) else {
            let err = if self.template_of(from).is_some() {
                Error::NotActive(from)
            } else {
                Error::StaleHandle(from)
            };
            return Err(self.fail(err));
        };
        let origin = firer.position;
        let position = match shot.offset {
            Offset::FireRadius => origin + direction(shot.angle) * firer.fire_radius(),
            Offset::Radius(r) => origin + direction(shot.angle) * r,
            Offset::Composed {
                long_radius,
                long_angle,
                short_radius,
            } => {
                origin
                    + direction(long_angle) * long_radius
                    + direction(shot.angle) * short_radius
            }
        };

        let mut heading = shot.angle;
        if shot.aimed {
            heading += self.aim_angle_from(position);
        }

        let handle = self.spawn(template, position)?;
        if let Some(body) = self.body_mut(handle) {
            body.set_movement(shot.speed, heading);
            if let Some((acceleration, limit)) = shot.acceleration {
                body.acceleration = acceleration;
                body.speed_limit = limit;
            }
            if let Some((angular_acceleration, limit)) = shot.turn {
                body.angular_acceleration = angular_acceleration;
                body.angular_speed_limit = limit;
            }
        }
        Ok(handle)
    }

    /// Fan of `way` shots centred on `shot.angle`
    pub fn fire_way(
        &mut self,
        from: Handle,
        template: TemplateId,
        shot: &Shot,
        way: u32,
        interval: f32,
    ) -> Result<Vec<Handle>> {
        fan_angles(shot.angle, way, interval)
            .map(|angle| self.fire_shot(from, template, &shot.with_speed_angle(shot.speed, angle)))
            .collect()
    }

    /// `n` shots evenly spaced around a full turn
    pub fn fire_round(
        &mut self,
        from: Handle,
        template: TemplateId,
        shot: &Shot,
        n: u32,
    ) -> Result<Vec<Handle>> {
        ring_angles(shot.angle, n)
            .map(|angle| self.fire_shot(from, template, &shot.with_speed_angle(shot.speed, angle)))
            .collect()
    }

    /// A ring of `n` fans, each `way` shots wide
    pub fn fire_round_way(
        &mut self,
        from: Handle,
        template: TemplateId,
        shot: &Shot,
        n: u32,
        way: u32,
        interval: f32,
    ) -> Result<Vec<Handle>> {
        let mut fired = Vec::new();
        for centre in ring_angles(shot.angle, n) {
            let fan = shot.with_speed_angle(shot.speed, centre);
            fired.extend(self.fire_way(from, template, &fan, way, interval)?);
        }
        Ok(fired)
    }

    /// `count` shots along one angle, speeds stepping down from `shot.speed`
    pub fn fire_line(
        &mut self,
        from: Handle,
        template: TemplateId,
        shot: &Shot,
        count: u32,
        speed_interval: f32,
    ) -> Result<Vec<Handle>> {
        (0..count)
            .map(|k| {
                let speed = shot.speed - speed_interval * k as f32;
                self.fire_shot(from, template, &shot.with_speed_angle(speed, shot.angle))
            })
            .collect()
    }

    fn aim_angle_from(&self, position: Vec2) -> f32 {
        match self.target() {
            Some(target) => crate::signed_angle(target - position),
            None => -90.0,
        }
    }
}

impl Act<'_> {
    /// Fire at the firer's fire radius
    pub fn fire(&mut self, template: TemplateId, speed: f32, angle: f32) -> Result<Handle> {
        self.fire_shot(template, &Shot::new(speed, angle))
    }

    /// Fire from an explicit radius
    pub fn fire_r(
        &mut self,
        template: TemplateId,
        speed: f32,
        angle: f32,
        radius: f32,
    ) -> Result<Handle> {
        self.fire_shot(template, &Shot::new(speed, angle).radius(radius))
    }

    /// Fire from a composed offset: `long_radius` along `long_angle`, then
    /// `short_radius` along the shot angle
    pub fn fire_r2(
        &mut self,
        template: TemplateId,
        speed: f32,
        angle: f32,
        long_radius: f32,
        long_angle: f32,
        short_radius: f32,
    ) -> Result<Handle> {
        let shot = Shot::new(speed, angle).composed(long_radius, long_angle, short_radius);
        self.fire_shot(template, &shot)
    }

    pub fn fire_shot(&mut self, template: TemplateId, shot: &Shot) -> Result<Handle> {
        let me = self.handle();
        self.world_mut().fire_shot(me, template, shot)
    }

    pub fn fire_way(
        &mut self,
        template: TemplateId,
        shot: &Shot,
        way: u32,
        interval: f32,
    ) -> Result<Vec<Handle>> {
        let me = self.handle();
        self.world_mut().fire_way(me, template, shot, way, interval)
    }

    pub fn fire_round(&mut self, template: TemplateId, shot: &Shot, n: u32) -> Result<Vec<Handle>> {
        let me = self.handle();
        self.world_mut().fire_round(me, template, shot, n)
    }

    pub fn fire_round_way(
        &mut self,
        template: TemplateId,
        shot: &Shot,
        n: u32,
        way: u32,
        interval: f32,
    ) -> Result<Vec<Handle>> {
        let me = self.handle();
        self.world_mut().fire_round_way(me, template, shot, n, way, interval)
    }

    pub fn fire_line(
        &mut self,
        template: TemplateId,
        shot: &Shot,
        count: u32,
        speed_interval: f32,
    ) -> Result<Vec<Handle>> {
        let me = self.handle();
        self.world_mut().fire_line(me, template, shot, count, speed_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::Settings;
    use crate::sim::behavior::{Sequence, Wait};
    use crate::sim::body::Template;
    use crate::sim::clock::HostFrame;

    fn setup() -> (World, Handle, TemplateId) {
        let mut world = World::new(&Settings::default());
        let enemy = world.register_template(Template::new("enemy").with_radii(10.0, 16.0));
        let bullet = world.register_template(Template::new("bullet").with_radii(0.0, 4.0));
        let firer = world.spawn(enemy, Vec2::ZERO).unwrap();
        (world, firer, bullet)
    }

    fn near(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_fire_places_at_fire_radius() {
        let (mut world, firer, bullet) = setup();
        let h = world.fire_shot(firer, bullet, &Shot::new(100.0, 90.0)).unwrap();
        let body = world.body(h).unwrap();
        assert!((body.position - Vec2::new(0.0, 10.0)).length() < 1e-4);
        assert_eq!(body.speed, 100.0);
        assert_eq!(body.heading(), 90.0);
    }

    #[test]
    fn test_composed_offset() {
        let (mut world, firer, bullet) = setup();
        let shot = Shot::new(50.0, 90.0).composed(20.0, 0.0, 5.0);
        let h = world.fire_shot(firer, bullet, &shot).unwrap();
        let pos = world.body(h).unwrap().position;
        assert!((pos - Vec2::new(20.0, 5.0)).length() < 1e-4);
    }

    #[test]
    fn test_accel_and_turn_applied() {
        let (mut world, firer, bullet) = setup();
        let shot = Shot::new(10.0, 0.0).accel(5.0, 40.0).turn(30.0, 90.0);
        let h = world.fire_shot(firer, bullet, &shot).unwrap();
        let body = world.body(h).unwrap();
        assert_eq!((body.acceleration, body.speed_limit), (5.0, 40.0));
        assert_eq!(
            (body.angular_acceleration, body.angular_speed_limit),
            (30.0, 90.0)
        );
    }

    #[test]
    fn test_aimed_shot_points_at_target() {
        let (mut world, firer, bullet) = setup();
        world.set_target(Some(Vec2::new(0.0, -200.0)));
        let h = world
            .fire_shot(firer, bullet, &Shot::new(10.0, 0.0).radius(0.0).aimed())
            .unwrap();
        assert!(near(world.body(h).unwrap().heading(), -90.0));
    }

    fn headings(world: &World, fired: &[Handle]) -> Vec<f32> {
        fired
            .iter()
            .map(|h| world.body(*h).unwrap().heading())
            .collect()
    }

    #[test]
    fn test_fan_is_centred() {
        let angles: Vec<f32> = fan_angles(-90.0, 5, 10.0).collect();
        assert_eq!(angles, vec![-110.0, -100.0, -90.0, -80.0, -70.0]);
        let even: Vec<f32> = fan_angles(0.0, 2, 30.0).collect();
        assert_eq!(even, vec![-15.0, 15.0]);
    }

    #[test]
    fn test_fired_fan_is_centred() {
        let (mut world, firer, bullet) = setup();
        for (way, interval) in [(5, 10.0), (4, 7.5), (1, 20.0)] {
            let fired = world
                .fire_way(firer, bullet, &Shot::new(80.0, -60.0), way, interval)
                .unwrap();
            let got = headings(&world, &fired);
            assert_eq!(got.len(), way as usize);
            let half = interval * (way - 1) as f32 / 2.0;
            assert!(near(got[0], -60.0 - half));
            assert!(near(got[got.len() - 1], -60.0 + half));
            for pair in got.windows(2) {
                assert!(near(pair[1] - pair[0], interval));
            }
        }
    }

    #[test]
    fn test_ring_is_symmetric() {
        let (mut world, firer, bullet) = setup();
        for (base, n) in [(17.5, 8u32), (-30.0, 7), (200.0, 12)] {
            let fired = world
                .fire_round(firer, bullet, &Shot::new(60.0, base), n)
                .unwrap();
            assert_eq!(fired.len(), n as usize);
            let got = headings(&world, &fired);
            for (k, heading) in got.iter().enumerate() {
                assert!(near(*heading, base + k as f32 * 360.0 / n as f32));
            }
            let sum: Vec2 = fired
                .iter()
                .map(|h| world.body(*h).unwrap().velocity())
                .sum();
            assert!(sum.length() < 1e-2);
        }
    }

    #[test]
    fn test_round_way_uses_fractional_spacing() {
        let angles: Vec<f32> = ring_angles(0.0, 7).collect();
        assert!(near(angles[1], 360.0 / 7.0));
        let (mut world, firer, bullet) = setup();
        let fired = world
            .fire_round_way(firer, bullet, &Shot::new(60.0, 0.0), 7, 3, 5.0)
            .unwrap();
        assert_eq!(fired.len(), 21);
    }

    #[test]
    fn test_line_steps_speed_down() {
        let (mut world, firer, bullet) = setup();
        let fired = world
            .fire_line(firer, bullet, &Shot::new(100.0, -90.0), 4, 15.0)
            .unwrap();
        let speeds: Vec<f32> = fired.iter().map(|h| world.body(*h).unwrap().speed).collect();
        assert_eq!(speeds, vec![100.0, 85.0, 70.0, 55.0]);
    }

    #[test]
    fn test_huge_round_way_from_idle_firer_is_an_error() {
        let (mut world, firer, bullet) = setup();
        world.deactivate(firer).unwrap();
        let err = world
            .fire_round_way(firer, bullet, &Shot::new(1.0, 0.0), 70_000, 70_000, 1.0)
            .unwrap_err();
        assert_eq!(err, Error::NotActive(firer));
    }

    #[test]
    fn test_idle_firer_rejected() {
        let (mut world, firer, bullet) = setup();
        world.deactivate(firer).unwrap();
        let err = world
            .fire_shot(firer, bullet, &Shot::new(1.0, 0.0))
            .unwrap_err();
        assert_eq!(err, Error::NotActive(firer));
    }

    #[test]
    fn test_fire_from_behavior_reuses_pool() {
        let (mut world, firer, bullet) = setup();
        world.prime(bullet, 16).unwrap();
        world
            .attach(
                firer,
                Sequence::new()
                    .then_do(move |act| {
                        act.fire_way(bullet, &Shot::new(80.0, -90.0), 5, 12.0)?;
                        Ok(())
                    })
                    .then_wait(Wait::Ticks(1))
                    .then_do(move |act| {
                        act.fire_round(bullet, &Shot::new(60.0, 0.0), 8)?;
                        Ok(())
                    }),
            )
            .unwrap();
        world.tick(HostFrame::at_rate(60));
        let stats = world.pool_stats(bullet).unwrap();
        assert_eq!(stats.active, 13);
        assert_eq!(stats.constructed, 16);
    }
}
