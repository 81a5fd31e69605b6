use crate::landscape::Coordinate;

/// Exclusive behavioral class of a live agent within one timestep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Handler,
    Forager,
    Kleptoparasite,
}

/// Per-agent state. Slots are reused across generations through [`Individual::sprout`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Individual {
    pub pos: Coordinate,
    /// Consumed food units; negative means dead.
    pub food: f32,
    pub forage: bool,
    pub handling: bool,
    /// Timesteps left until the handled item is consumed.
    pub handle_time: i32,
    /// Set when the agent fled a contest this tick; blocks foraging until the tick ends.
    pub just_lost: bool,
    /// Timesteps spent searching for items.
    pub foraged: u32,
    /// Timesteps spent handling an item.
    pub handled: u32,
    /// Index of the parent in the previous generation.
    pub ancestor: u32,
}

impl Individual {
    pub fn sprout(&mut self, pos: Coordinate, ancestor: u32) {
        *self = Individual {
            pos,
            ancestor,
            ..Individual::default()
        };
    }

    pub fn is_alive(&self) -> bool {
        self.food >= 0.0
    }

    pub fn die(&mut self) {
        self.food = -1.0;
        self.handling = false;
        self.handle_time = 0;
    }

    pub fn role(&self) -> Option<Role> {
        if !self.is_alive() {
            None
        } else if self.handling {
            Some(Role::Handler)
        } else if self.forage {
            Some(Role::Forager)
        } else {
            Some(Role::Kleptoparasite)
        }
    }

    pub fn pick_item(&mut self, handling_time: i32) {
        self.handling = true;
        self.handle_time = handling_time;
    }

    /// Advance the handling countdown. Returns `true` when the item is consumed.
    pub fn tick_handling(&mut self) -> bool {
        if !self.handling {
            return false;
        }
        self.handle_time -= 1;
        if self.handle_time > 0 {
            return false;
        }
        self.handle_time = 0;
        self.handling = false;
        self.food += 1.0;
        true
    }

    /// Take over the item `victim` is handling, countdown included.
    pub fn inherit_item(&mut self, victim: &Individual) {
        self.handling = victim.handling;
        self.handle_time = victim.handle_time;
    }

    pub fn flee_to(&mut self, pos: Coordinate) {
        self.pos = pos;
        self.handling = false;
        self.handle_time = 0;
        self.just_lost = true;
    }
}
