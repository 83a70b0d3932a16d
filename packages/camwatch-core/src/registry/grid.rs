//! Square display grid over the registry's sessions.

use super::SessionRegistry;
use crate::stream::SessionView;

pub const MAX_GRID_SIZE: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("grid size {0} is outside 1..=8")]
    InvalidSize(usize),
}

/// One display cell. `session` is `None` for placeholder ("No Feed") cells.
#[derive(Debug, Clone)]
pub struct GridSlot {
    pub row: usize,
    pub col: usize,
    pub session: Option<SessionView>,
}

impl GridSlot {
    pub fn is_placeholder(&self) -> bool {
        self.session.is_none()
    }
}

/// Maps sessions onto an n x n grid in list order, row-major.
///
/// Layout never opens or closes sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridCompositor {
    size: usize,
}

impl GridCompositor {
    pub fn new(size: usize) -> Result<Self, GridError> {
        validate(size)?;
        Ok(Self { size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn slot_count(&self) -> usize {
        self.size * self.size
    }

    pub fn set_grid_size(&mut self, size: usize) -> Result<(), GridError> {
        validate(size)?;
        if size != self.size {
            tracing::debug!("Grid resized {}x{} -> {}x{}", self.size, self.size, size, size);
        }
        self.size = size;
        Ok(())
    }

    pub fn layout(&self, registry: &SessionRegistry) -> Vec<GridSlot> {
        let mut views = registry.views().into_iter();
        let slots: Vec<GridSlot> = (0..self.size)
            .flat_map(|row| (0..self.size).map(move |col| (row, col)))
            .map(|(row, col)| GridSlot {
                row,
                col,
                session: views.next(),
            })
            .collect();

        let hidden = views.count();
        if hidden > 0 {
            tracing::debug!(
                "{} cameras do not fit the {}x{} grid",
                hidden,
                self.size,
                self.size
            );
        }
        slots
    }
}

impl Default for GridCompositor {
    fn default() -> Self {
        Self { size: 2 }
    }
}

fn validate(size: usize) -> Result<(), GridError> {
    if (1..=MAX_GRID_SIZE).contains(&size) {
        Ok(())
    } else {
        Err(GridError::InvalidSize(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraBrand, CameraConfig};
    use crate::stream::{Connector, NoopDetector, SessionSettings, Transport, TransportError};
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Connector that never connects, so sessions stay initializing.
    struct Unreachable;

    #[async_trait]
    impl Connector for Unreachable {
        async fn open(&self, _url: &str) -> Result<Arc<dyn Transport>, TransportError> {
            std::future::pending().await
        }
    }

    fn registry_with(count: usize) -> SessionRegistry {
        let mut registry = SessionRegistry::new(
            Arc::new(Unreachable),
            Arc::new(NoopDetector),
            SessionSettings::default(),
        );
        for i in 0..count {
            let config = CameraConfig::new(
                format!("Cam {}", i + 1),
                CameraBrand::Generic,
                format!("10.0.0.{}", i + 1),
                554,
            );
            registry.add(config).unwrap();
        }
        registry
    }

    fn bound(slots: &[GridSlot]) -> Vec<Option<String>> {
        slots
            .iter()
            .map(|s| s.session.as_ref().map(|v| v.camera().to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_row_major_with_placeholders() {
        let registry = registry_with(3);
        let grid = GridCompositor::new(2).unwrap();

        let slots = grid.layout(&registry);
        assert_eq!(slots.len(), 4);
        let coords: Vec<_> = slots.iter().map(|s| (s.row, s.col)).collect();
        assert_eq!(coords, vec![(0, 0), (0, 1), (1, 0), (1, 1)]);
        assert_eq!(
            bound(&slots),
            vec![
                Some("Cam 1".to_string()),
                Some("Cam 2".to_string()),
                Some("Cam 3".to_string()),
                None,
            ]
        );
        assert!(slots[3].is_placeholder());
    }

    #[tokio::test]
    async fn test_resize_changes_slots_not_sessions() {
        let registry = registry_with(5);
        let mut grid = GridCompositor::default();
        assert_eq!(grid.layout(&registry).len(), 4);

        grid.set_grid_size(1).unwrap();
        let slots = grid.layout(&registry);
        assert_eq!(bound(&slots), vec![Some("Cam 1".to_string())]);

        grid.set_grid_size(3).unwrap();
        let slots = grid.layout(&registry);
        assert_eq!(slots.len(), 9);
        assert_eq!(slots.iter().filter(|s| s.is_placeholder()).count(), 4);
        assert_eq!(slots[4].session.as_ref().unwrap().camera(), "Cam 5");

        assert_eq!(registry.len(), 5);
    }

    #[test]
    fn test_grid_size_bounds() {
        assert!(matches!(GridCompositor::new(0), Err(GridError::InvalidSize(0))));
        assert!(matches!(GridCompositor::new(9), Err(GridError::InvalidSize(9))));
        let mut grid = GridCompositor::new(8).unwrap();
        assert!(grid.set_grid_size(0).is_err());
        assert_eq!(grid.size(), 8);
        assert_eq!(grid.slot_count(), 64);
    }
}
