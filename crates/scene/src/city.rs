use std::path::Path;
use std::time::Instant;

use sunrise_assets::BufferLoader;
use sunrise_common::{Affine, InstanceId};
use sunrise_kernel::{RendererContext, World, WorldInstance};

use crate::config::SceneConfig;
use crate::error::SceneError;
use crate::geometry::{GeometryBuilder, MESH_POSITION_SUFFIX};

/// What [`SceneAssembly::populate`] placed in the world.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneSummary {
    pub background: InstanceId,
    pub buildings: Vec<InstanceId>,
    pub roads: Option<InstanceId>,
    /// Buildings found on disk but left out by the limit or the world's cap.
    pub skipped: usize,
}

/// Loads a whole city into a world: backdrop, buildings, roads.
pub struct SceneAssembly<'a> {
    builder: GeometryBuilder<'a>,
    config: &'a SceneConfig,
}

impl<'a> SceneAssembly<'a> {
    pub fn new(ctx: &'a RendererContext, config: &'a SceneConfig) -> Self {
        Self {
            builder: GeometryBuilder::new(ctx, BufferLoader::with_options(config.load)),
            config,
        }
    }

    /// Building names under `dir`, sorted.
    pub fn building_names(dir: &Path) -> Result<Vec<String>, SceneError> {
        let listing = |source| SceneError::Listing {
            path: dir.to_path_buf(),
            source,
        };
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(listing)? {
            let entry = entry.map_err(listing)?;
            let file_name = entry.file_name();
            if let Some(name) = file_name
                .to_str()
                .and_then(|f| f.strip_suffix(MESH_POSITION_SUFFIX))
            {
                names.push(name.to_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Build every instance and add it to `world`. Does not commit.
    ///
    /// The backdrop is always placed first, so a populated world holds exactly
    /// one background; a world that already has one is rejected.
    pub fn populate(&self, world: &mut World) -> Result<SceneSummary, SceneError> {
        let _span = tracing::info_span!("scene_populate").entered();
        let start = Instant::now();
        let config = self.config;

        let background = self.builder.background(
            &config.background_dir,
            Affine::mirrored_xy(config.background_scale),
        )?;
        let background_id = background.id();
        world.add_instance(Box::new(background))?;

        let roads = match &config.roads_dir {
            Some(dir) => {
                let roads = self
                    .builder
                    .curves(dir, Affine::mirrored_xy(config.road_scale))?;
                let id = roads.id();
                world.add_instance(Box::new(roads))?;
                Some(id)
            }
            None => None,
        };

        let mut buildings = Vec::new();
        let mut skipped = 0;
        if let Some(dir) = &config.buildings_dir {
            let names = Self::building_names(dir)?;
            let room = world.instance_cap().saturating_sub(world.instance_count());
            let take = names.len().min(config.building_limit).min(room);
            skipped = names.len() - take;
            if skipped > 0 {
                tracing::warn!(found = names.len(), loading = take, "building count capped");
            }
            for (i, name) in names.iter().take(take).enumerate() {
                let building = self.builder.triangle_mesh(
                    dir,
                    name,
                    config.building_color,
                    Affine::uniform(config.building_scale),
                )?;
                buildings.push(building.id());
                world.add_instance(Box::new(building))?;
                if (i + 1) % 1000 == 0 {
                    tracing::info!(loaded = i + 1, total = take, "buildings");
                }
            }
        }

        tracing::info!(
            buildings = buildings.len(),
            skipped,
            roads = roads.is_some(),
            elapsed_ns = start.elapsed().as_nanos() as u64,
            "scene populated"
        );
        Ok(SceneSummary {
            background: background_id,
            buildings,
            roads,
            skipped,
        })
    }
}
