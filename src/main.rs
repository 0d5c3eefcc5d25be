//! Barrage entry point
//!
//! Headless harness: builds a world, scripts a small wave of enemies and runs
//! it for a fixed number of ticks, logging pool statistics as it goes.
//!
//! Usage: `barrage [settings.json]`

#[cfg(not(target_arch = "wasm32"))]
fn main() {
    env_logger::init();
    log::info!("Barrage (native) starting...");

    let settings = match std::env::args().nth(1) {
        Some(path) => match barrage::Settings::load(&path) {
            Ok(settings) => settings,
            Err(e) => {
                log::error!("Falling back to default settings: {e}");
                barrage::Settings::default()
            }
        },
        None => barrage::Settings::default(),
    };

    if let Err(e) = demo::run(&settings) {
        log::error!("Demo aborted: {e}");
        std::process::exit(1);
    }
}

#[cfg(target_arch = "wasm32")]
fn main() {}

#[cfg(not(target_arch = "wasm32"))]
mod demo {
    use barrage::Settings;
    use barrage::consts::DEFAULT_TARGET_RATE;
    use barrage::error::Result;
    use barrage::sim::{
        Behavior, HostFrame, Sequence, Shot, Template, TemplateId, Wait, World, body_roll,
        look_at_target, repeat_n,
    };
    use glam::Vec2;

    const DEMO_TICKS: u32 = 600;
    const CULL_MARGIN: f32 = 32.0;

    pub fn run(settings: &Settings) -> Result<()> {
        let mut world = World::new(settings);
        let field = *world.playfield();

        let enemy = world.register_template(Template::new("enemy").with_radii(12.0, 16.0));
        let spinner = world.register_template(
            Template::new("spinner")
                .with_radii(8.0, 20.0)
                .with_heading_link(false),
        );
        let bullet = world.register_template(Template::new("bullet").with_radii(0.0, 4.0));
        world.prime(bullet, 256)?;
        world.set_target(Some(field.at(0.0, -0.8)));

        // Two divers: drop in, spray fans at the player, then leave
        for fx in [-0.5, 0.5] {
            let h = world.spawn(enemy, field.at(fx, 1.1))?;
            world.attach(h, diver(field.at(fx, 0.5), bullet))?;
        }

        // A spinner in the middle firing rings while it rolls
        let s = world.spawn(spinner, field.at(0.0, 1.1))?;
        world.attach(s, spinner_pattern(field.at(0.0, 0.3), bullet))?;
        world.attach(s, body_roll(180.0))?;

        let frame = HostFrame::at_rate(settings.clock.target_rate.max(1));
        for _ in 0..DEMO_TICKS {
            world.tick(frame);
            world.deactivate_outside(CULL_MARGIN);
            if world.clock().ticks() % DEFAULT_TARGET_RATE as u64 == 0 {
                log_stats(&world, &[("enemy", enemy), ("spinner", spinner), ("bullet", bullet)]);
            }
        }

        let diagnostics = world.take_diagnostics();
        log::info!(
            "Finished {} ticks ({:.2}s simulated), {} active, {} diagnostics",
            world.clock().ticks(),
            world.clock().elapsed(),
            world.active_count(),
            diagnostics.len()
        );
        for d in diagnostics {
            log::warn!("{d}");
        }
        Ok(())
    }

    fn diver(stop: Vec2, bullet: TemplateId) -> Sequence {
        Sequence::new()
            .then_do(move |act| {
                act.set_dest_at_time(stop, 1.0);
                Ok(())
            })
            .then_wait(Wait::Stopped)
            .then(repeat_n(3, move || {
                let volley = Sequence::new()
                    .then_do(move |act| {
                        let shot = Shot::new(120.0, 0.0).aimed();
                        act.fire_way(bullet, &shot, 5, 12.0)?;
                        Ok(())
                    })
                    .then_wait(Wait::frames(20));
                Box::new(volley) as Box<dyn Behavior>
            }))
            .then_wait(Wait::Seconds(0.5))
            .then_do(|act| {
                act.body_mut().set_movement(0.0, 90.0);
                act.body_mut().acceleration = 240.0;
                act.body_mut().speed_limit = 300.0;
                Ok(())
            })
    }

    fn spinner_pattern(stop: Vec2, bullet: TemplateId) -> Sequence {
        let mut volley = 0u32;
        Sequence::new()
            .then_do(move |act| {
                act.set_dest_at_time(stop, 1.5);
                Ok(())
            })
            .then_wait(Wait::Stopped)
            .then(repeat_n(8, move || {
                volley += 1;
                let i = volley;
                let ring = Sequence::new()
                    .then_do(move |act| {
                        let base = act.body().body_heading + i as f32 * 7.5;
                        act.fire_round(bullet, &Shot::new(90.0, base).accel(-60.0, 40.0), 16)?;
                        act.fire_line(bullet, &Shot::new(200.0, 0.0).aimed(), 4, 25.0)?;
                        Ok(())
                    })
                    .then_wait(Wait::Seconds(0.4));
                Box::new(ring) as Box<dyn Behavior>
            }))
            .then_do(|act| {
                act.start(look_at_target())?;
                act.set_ranged_dest_around(80.0, 40.0, 1.0);
                Ok(())
            })
            .then_wait(Wait::Stopped)
    }

    fn log_stats(world: &World, templates: &[(&str, TemplateId)]) {
        for (name, id) in templates {
            if let Some(stats) = world.pool_stats(*id) {
                log::info!(
                    "t={} {name}: active {} idle {} constructed {} high water {}",
                    world.clock().ticks(),
                    stats.active,
                    stats.idle,
                    stats.constructed,
                    stats.high_water
                );
            }
        }
    }
}
