//! Connected displays

/// One connected display in root-window coordinates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Monitor {
    pub name: String,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub primary: bool,
}

impl Monitor {
    /// Single monitor spanning the whole root window
    pub fn root(width: u16, height: u16) -> Self {
        Self {
            name: "root".to_string(),
            x: 0,
            y: 0,
            width,
            height,
            primary: true,
        }
    }
}

/// Split monitors into the primary one and the rest.
///
/// The first monitor flagged primary wins; if none is flagged, the first
/// monitor is used. Returns None for an empty list.
pub fn split_primary(monitors: &[Monitor]) -> Option<(Monitor, Vec<Monitor>)> {
    let index = monitors.iter().position(|m| m.primary).unwrap_or(0);
    let primary = monitors.get(index)?.clone();
    let others = monitors
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .map(|(_, m)| m.clone())
        .collect();
    Some((primary, others))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mon(name: &str, x: i16, primary: bool) -> Monitor {
        Monitor {
            name: name.to_string(),
            x,
            y: 0,
            width: 1920,
            height: 1080,
            primary,
        }
    }

    #[test]
    fn test_split_flagged_primary() {
        let monitors = vec![
            mon("DP-1", 0, false),
            mon("eDP-1", 1920, true),
            mon("HDMI-1", 3840, false),
        ];
        let (primary, others) = split_primary(&monitors).unwrap();
        assert_eq!(primary.name, "eDP-1");
        assert_eq!(
            others.iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
            vec!["DP-1", "HDMI-1"]
        );
    }

    #[test]
    fn test_split_without_primary_uses_first() {
        let monitors = vec![mon("DP-1", 0, false), mon("DP-2", 1920, false)];
        let (primary, others) = split_primary(&monitors).unwrap();
        assert_eq!(primary.name, "DP-1");
        assert_eq!(others.len(), 1);
    }

    #[test]
    fn test_split_single_and_empty() {
        let (primary, others) = split_primary(&[Monitor::root(1280, 800)]).unwrap();
        assert_eq!(primary.width, 1280);
        assert!(others.is_empty());
        assert!(split_primary(&[]).is_none());
    }
}
