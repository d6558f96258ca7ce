//! Lazily populated browse tree over one or more collections.
//!
//! The model owns every node in an arena and is driven from a single thread:
//! GUI commands and backend completions both arrive as [`BrowserInput`]s on
//! one channel and are applied in order. Children are listed only when a
//! node is first needed and are diffed against the existing children when a
//! node is reloaded, so surviving nodes keep their ids.

pub mod expansion;
pub mod levels;
pub mod node;
pub mod registry;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::{broadcast, mpsc};

use crate::collection::BrowserContext;
use crate::config::{BrowserConfig, LayoutMode};
use crate::filter::{add_textual_filter, FilterExpression};
use crate::meta::{Entity, EntityKey, Track};
use crate::protocol::{BrowserEvent, BrowserInput, QueryEvent};
use crate::query::{
    AlbumQueryMode, ChannelSink, FilterField, LabelQueryMode, QueryMaker, QueryType, ResultSink,
};
use crate::transfer::TransferPayload;

use expansion::ExpansionState;
use levels::{header_text, Category};
use node::{NodeArena, TreeNode};
use registry::{PendingQueryRegistry, QueryPurpose};

pub use node::{NodeId, NodeKind, SpecialKind};

/// Presentation and grouping settings the model is built with.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeOptions {
    pub levels: Vec<Category>,
    pub layout: LayoutMode,
    pub show_track_numbers: bool,
    pub show_years: bool,
    pub loading_animation_delay: Duration,
    pub animation_tick: Duration,
}

impl From<&BrowserConfig> for TreeOptions {
    fn from(config: &BrowserConfig) -> Self {
        Self {
            levels: config.levels.clone(),
            layout: config.layout,
            show_track_numbers: config.show_track_numbers,
            show_years: config.show_years,
            loading_animation_delay: Duration::from_millis(config.loading_animation_delay_ms),
            animation_tick: Duration::from_millis(config.animation_tick_ms),
        }
    }
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self::from(&BrowserConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterChange {
    Applied,
    /// Queries were still running; nothing changed.
    IgnoredBusy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IconHint {
    Named(&'static str),
    /// Frame of the loading indicator, alternating between 0 and 1.
    Loading(u8),
}

struct LoadingAnimation {
    delay: Duration,
    tick: Duration,
    delay_pending: bool,
    delay_generation: u64,
    ticker: Option<Arc<AtomicBool>>,
    generation: u64,
    frame: u8,
}

pub struct CollectionTreeModel {
    context: BrowserContext,
    layout: LayoutMode,
    levels: Vec<Category>,
    show_track_numbers: bool,
    show_years: bool,
    nodes: NodeArena,
    root: NodeId,
    registry: PendingQueryRegistry,
    expansion: ExpansionState,
    filter_text: String,
    filter: FilterExpression,
    auto_expand: bool,
    animation: LoadingAnimation,
    input_tx: mpsc::UnboundedSender<BrowserInput>,
    input_rx: mpsc::UnboundedReceiver<BrowserInput>,
    event_tx: broadcast::Sender<BrowserEvent>,
}

impl CollectionTreeModel {
    pub fn new(
        context: BrowserContext,
        options: TreeOptions,
        event_tx: broadcast::Sender<BrowserEvent>,
    ) -> Self {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let mut nodes = NodeArena::new();
        let root = nodes.insert(TreeNode::new(NodeKind::Root, None, None, None));
        let mut model = Self {
            context,
            layout: options.layout,
            levels: options.levels,
            show_track_numbers: options.show_track_numbers,
            show_years: options.show_years,
            nodes,
            root,
            registry: PendingQueryRegistry::default(),
            expansion: ExpansionState::default(),
            filter_text: String::new(),
            filter: FilterExpression::default(),
            auto_expand: false,
            animation: LoadingAnimation {
                delay: options.loading_animation_delay,
                tick: options.animation_tick,
                delay_pending: false,
                delay_generation: 0,
                ticker: None,
                generation: 0,
                frame: 0,
            },
            input_tx,
            input_rx,
            event_tx,
        };
        model.build_top_level();
        model
    }

    fn build_top_level(&mut self) {
        if self.layout == LayoutMode::Merged {
            return;
        }
        let ids: Vec<_> = self
            .context
            .collections()
            .iter()
            .map(|collection| collection.collection_id().clone())
            .collect();
        for id in ids {
            let child = self.nodes.insert(TreeNode::new(
                NodeKind::Collection(id.clone()),
                Some(self.root),
                None,
                Some(id),
            ));
            if let Some(root) = self.nodes.get_mut(self.root) {
                root.children.push(child);
            }
        }
        if let Some(root) = self.nodes.get_mut(self.root) {
            root.requires_update = false;
        }
    }

    /// Sender for GUI commands; backends are wired up internally.
    pub fn input_sender(&self) -> mpsc::UnboundedSender<BrowserInput> {
        self.input_tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BrowserEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: BrowserEvent) {
        let _ = self.event_tx.send(event);
    }

    // ------------------------------------------------------------------
    // Read access
    // ------------------------------------------------------------------

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains(node)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node)
            .map(|node| node.children.as_slice())
            .unwrap_or_default()
    }

    pub fn child(&self, parent: NodeId, row: usize) -> Option<NodeId> {
        self.children(parent).get(row).copied()
    }

    pub fn row_count(&self, parent: NodeId) -> usize {
        self.children(parent).len()
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node).and_then(|node| node.parent)
    }

    /// Position of `node` among its siblings.
    pub fn row(&self, node: NodeId) -> Option<usize> {
        let parent = self.parent(node)?;
        self.children(parent).iter().position(|child| *child == node)
    }

    pub fn node_kind(&self, node: NodeId) -> Option<&NodeKind> {
        self.nodes.get(node).map(|node| &node.kind)
    }

    pub fn entity(&self, node: NodeId) -> Option<&Entity> {
        self.nodes.get(node).and_then(TreeNode::entity)
    }

    pub fn level(&self, node: NodeId) -> Option<usize> {
        self.nodes.get(node).and_then(|node| node.level)
    }

    pub fn is_leaf(&self, node: NodeId) -> bool {
        self.nodes.get(node).is_some_and(TreeNode::is_track)
    }

    /// True while the children are unknown or known to exist.
    pub fn has_children(&self, node: NodeId) -> bool {
        self.nodes
            .get(node)
            .is_some_and(|node| {
                !node.is_track() && (node.requires_update || !node.children.is_empty())
            })
    }

    pub fn requires_update(&self, node: NodeId) -> bool {
        self.nodes.get(node).is_some_and(|node| node.requires_update)
    }

    pub fn is_querying(&self) -> bool {
        !self.registry.is_empty()
    }

    pub fn levels(&self) -> &[Category] {
        &self.levels
    }

    pub fn layout(&self) -> LayoutMode {
        self.layout
    }

    pub fn filter_text(&self) -> &str {
        &self.filter_text
    }

    pub fn header_text(&self) -> String {
        header_text(&self.levels, self.show_years)
    }

    pub fn icon_hint(&self, node: NodeId) -> Option<IconHint> {
        let tree_node = self.nodes.get(node)?;
        if node == self.root {
            return None;
        }
        if self.animation.ticker.is_some() && self.registry.contains_node(node) {
            return Some(IconHint::Loading(self.animation.frame));
        }
        let name = match &tree_node.kind {
            NodeKind::Root => return None,
            NodeKind::Collection(_) => "drive-harddisk",
            NodeKind::Special(SpecialKind::VariousArtists) => "similarartists",
            NodeKind::Special(SpecialKind::NoLabel) => "label",
            NodeKind::Data(Entity::Track(_)) => "media-album-track",
            NodeKind::Data(_) => tree_node
                .level
                .and_then(|level| self.levels.get(level))
                .map_or("folder", |category| category.icon_name()),
        };
        Some(IconHint::Named(name))
    }

    pub fn display_name(&self, node: NodeId) -> String {
        let Some(tree_node) = self.nodes.get(node) else {
            return String::new();
        };
        let name = match &tree_node.kind {
            NodeKind::Root => return self.header_text(),
            NodeKind::Collection(id) => {
                return self
                    .context
                    .collection(id)
                    .map_or_else(
                        || id.to_string(),
                        |collection| collection.pretty_name().to_string(),
                    )
            }
            NodeKind::Special(SpecialKind::VariousArtists) => return "Various Artists".to_string(),
            NodeKind::Special(SpecialKind::NoLabel) => return "No Labels".to_string(),
            NodeKind::Data(Entity::Track(track)) => self.track_display_name(track),
            NodeKind::Data(Entity::Album(album)) => {
                if self.show_years && album.year > 0 && !album.name.is_empty() {
                    format!("{} - {}", album.year, album.name)
                } else {
                    album.name.clone()
                }
            }
            NodeKind::Data(entity) => entity.name(),
        };
        if name.is_empty() {
            "Unknown".to_string()
        } else {
            name
        }
    }

    fn track_display_name(&self, track: &Track) -> String {
        if track.title.is_empty() {
            return String::new();
        }
        let mut name = track.title.clone();
        if track.is_compilation && !track.artist.is_empty() {
            name = format!("{} - {}", track.artist, name);
        }
        if self.show_track_numbers && track.track_number > 0 {
            name = format!("{} - {}", track.track_number, name);
        }
        name
    }

    fn children_level(&self, node: NodeId) -> usize {
        self.nodes
            .get(node)
            .and_then(|node| node.level)
            .map_or(0, |level| level + 1)
    }

    /// Root of a collections layout only holds the fixed collection nodes.
    fn is_static(&self, node: NodeId) -> bool {
        node == self.root && self.layout == LayoutMode::Collections
    }

    fn special_allowed(&self, parent: NodeId, kind: SpecialKind) -> bool {
        let level = self.children_level(parent);
        match kind {
            SpecialKind::VariousArtists => {
                self.levels
                    .get(level)
                    .is_some_and(|category| category.groups_artists())
                    && self.levels.get(level + 1) == Some(&Category::Album)
            }
            SpecialKind::NoLabel => self.levels.get(level) == Some(&Category::Label),
        }
    }

    fn special_child(&self, parent: NodeId, kind: SpecialKind) -> Option<(usize, NodeId)> {
        self.children(parent)
            .iter()
            .enumerate()
            .find(|(_, child)| {
                self.nodes
                    .get(**child)
                    .and_then(TreeNode::special_kind)
                    == Some(kind)
            })
            .map(|(row, child)| (row, *child))
    }

    // ------------------------------------------------------------------
    // Commands
    // ------------------------------------------------------------------

    /// Starts listing the children of `node` unless they are loaded or
    /// already being listed.
    pub fn ensure_children_loaded(&mut self, node: NodeId) {
        let Some(tree_node) = self.nodes.get(node) else {
            return;
        };
        if tree_node.is_track() || self.is_static(node) {
            return;
        }
        if let NodeKind::Special(_) = tree_node.kind {
            // Special nodes are filled by their parent's sub-query.
            if tree_node.requires_update {
                if let Some(parent) = tree_node.parent {
                    if let Some(parent_node) = self.nodes.get_mut(parent) {
                        parent_node.requires_update = true;
                    }
                    self.ensure_children_loaded(parent);
                }
            }
            return;
        }
        if !tree_node.requires_update || self.registry.contains_node(node) {
            return;
        }
        self.list_for_level(node);
    }

    pub fn node_expanded(&mut self, node: NodeId) {
        let Some(tree_node) = self.nodes.get(node) else {
            return;
        };
        match &tree_node.kind {
            NodeKind::Collection(id) => self.expansion.insert_collection(id.clone()),
            NodeKind::Special(kind) => self
                .expansion
                .insert_special(tree_node.collection.clone(), *kind),
            // Loading children records the key; loaded ones are recorded here.
            NodeKind::Data(entity) if !tree_node.requires_update => {
                let key = entity.key(tree_node.collection.as_ref());
                self.expansion.insert_entity(key);
            }
            NodeKind::Root | NodeKind::Data(_) => {}
        }
        self.ensure_children_loaded(node);
    }

    pub fn node_collapsed(&mut self, node: NodeId) {
        let Some(tree_node) = self.nodes.get(node) else {
            return;
        };
        match &tree_node.kind {
            NodeKind::Collection(id) => self.expansion.remove_collection(id),
            NodeKind::Special(kind) => self
                .expansion
                .remove_special(tree_node.collection.clone(), *kind),
            NodeKind::Data(entity) => {
                let key = entity.key(tree_node.collection.as_ref());
                self.expansion.remove_entity(&key);
            }
            NodeKind::Root => {}
        }
    }

    /// Replaces the active filter and reloads the tree. Refused while any
    /// query is still running.
    pub fn set_active_filter(&mut self, text: &str, auto_expand: bool) -> FilterChange {
        if self.is_querying() {
            info!("Ignoring filter {:?} while queries are running", text);
            self.emit(BrowserEvent::FilterIgnoredBusy);
            return FilterChange::IgnoredBusy;
        }
        info!("Applying filter {:?}", text);
        self.filter_text = text.to_string();
        self.filter = FilterExpression::parse(text);
        self.auto_expand = auto_expand;
        self.reload_top_level();

        let expanded: Vec<NodeId> = self
            .children(self.root)
            .iter()
            .copied()
            .filter(|child| {
                matches!(
                    self.node_kind(*child),
                    Some(NodeKind::Collection(id)) if self.expansion.contains_collection(id)
                )
            })
            .collect();
        for child in expanded {
            self.emit(BrowserEvent::ExpandNode(child));
        }
        FilterChange::Applied
    }

    pub fn set_levels(&mut self, levels: Vec<Category>) {
        if levels.is_empty() {
            warn!("Ignoring empty grouping level list");
            return;
        }
        if levels == self.levels {
            return;
        }
        info!("Regrouping tree by {:?}", levels);
        self.registry.abort_all();
        self.stop_animation();
        self.auto_expand = false;
        self.levels = levels;
        self.expansion.clear();

        let top: Vec<NodeId> = match self.layout {
            LayoutMode::Merged => vec![self.root],
            LayoutMode::Collections => self.children(self.root).to_vec(),
        };
        for parent in top {
            self.remove_all_children(parent);
        }
        self.emit(BrowserEvent::LevelsChanged {
            header: self.header_text(),
        });
        self.reload_top_level();
    }

    /// Flags `node` and everything below it for reloading on next use.
    pub fn mark_subtree_dirty(&mut self, node: NodeId) {
        for id in self.nodes.subtree(node) {
            if self.is_static(id) {
                continue;
            }
            if let Some(tree_node) = self.nodes.get_mut(id) {
                if !tree_node.is_track() {
                    tree_node.requires_update = true;
                }
            }
        }
    }

    /// Reloads the tree after the collections' contents changed.
    pub fn refresh(&mut self) {
        info!("Refreshing collection tree");
        self.reload_top_level();
    }

    fn reload_top_level(&mut self) {
        self.mark_subtree_dirty(self.root);
        match self.layout {
            LayoutMode::Merged => self.ensure_children_loaded(self.root),
            LayoutMode::Collections => {
                for child in self.children(self.root).to_vec() {
                    self.ensure_children_loaded(child);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Input handling
    // ------------------------------------------------------------------

    pub fn handle_input(&mut self, input: BrowserInput) {
        match input {
            BrowserInput::Query(event) => self.handle_query_event(event),
            BrowserInput::EnsureChildrenLoaded(node) => self.ensure_children_loaded(node),
            BrowserInput::NodeExpanded(node) => self.node_expanded(node),
            BrowserInput::NodeCollapsed(node) => self.node_collapsed(node),
            BrowserInput::SetFilter { text, auto_expand } => {
                let _ = self.set_active_filter(&text, auto_expand);
            }
            BrowserInput::SetLevels(levels) => self.set_levels(levels),
            BrowserInput::Refresh => self.refresh(),
            BrowserInput::AnimationDelayElapsed { generation } => {
                self.start_animation(generation)
            }
            BrowserInput::AnimationTick { generation } => self.advance_animation(generation),
            BrowserInput::Shutdown => {}
        }
    }

    /// Applies everything already queued without blocking.
    pub fn process_pending(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(input) = self.input_rx.try_recv() {
            self.handle_input(input);
            handled += 1;
        }
        handled
    }

    /// Blocks until no query is outstanding. Must not be called from
    /// within an async runtime.
    pub fn process_until_idle(&mut self) {
        self.process_pending();
        while self.is_querying() {
            let Some(input) = self.input_rx.blocking_recv() else {
                break;
            };
            self.handle_input(input);
        }
    }

    /// Handles inputs until [`BrowserInput::Shutdown`] arrives.
    pub fn run(&mut self) {
        while let Some(input) = self.input_rx.blocking_recv() {
            if let BrowserInput::Shutdown = input {
                info!("Collection tree shutting down");
                break;
            }
            self.handle_input(input);
        }
        self.registry.abort_all();
        self.stop_animation();
    }

    fn handle_query_event(&mut self, event: QueryEvent) {
        match event {
            QueryEvent::NewResults { handle, batch } => {
                if !self.registry.append_results(handle, batch.into_entities()) {
                    debug!("Dropping results for unknown query {:?}", handle);
                }
            }
            QueryEvent::Done { handle } => {
                let Some((purpose, pending)) = self.registry.take(handle) else {
                    debug!("Ignoring completion of unknown query {:?}", handle);
                    return;
                };
                let node = pending.node;
                debug!(
                    "{:?} query {:?} for node {:?} finished with {} results",
                    purpose,
                    handle,
                    node,
                    pending.results.len()
                );
                match purpose {
                    QueryPurpose::Children => self.handle_children_result(node, pending.results),
                    QueryPurpose::Compilations => self.handle_special_result(
                        node,
                        SpecialKind::VariousArtists,
                        pending.results,
                    ),
                    QueryPurpose::NoLabels => {
                        self.handle_special_result(node, SpecialKind::NoLabel, pending.results)
                    }
                }
                if node != self.root && self.nodes.contains(node) {
                    self.emit(BrowserEvent::DataChanged(node));
                }
                if self.registry.is_empty() {
                    let auto_expand = std::mem::take(&mut self.auto_expand);
                    self.stop_animation();
                    self.emit(BrowserEvent::AllQueriesFinished { auto_expand });
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Query construction
    // ------------------------------------------------------------------

    fn list_for_level(&mut self, node: NodeId) {
        let level = self.children_level(node);
        let collection = self.nodes.get(node).and_then(|node| node.collection.clone());
        let mut maker = self.context.query_maker_for(collection.as_ref());
        match self.levels.get(level).copied() {
            Some(category) => {
                maker.set_query_type(category.query_type());
                maker.order_by(category.filter_field(), false);
                if category == Category::Album
                    && level > 0
                    && self.levels.get(level - 1) == Some(&Category::AlbumArtist)
                {
                    // Compilations are listed under Various Artists instead.
                    maker.set_album_query_mode(AlbumQueryMode::OnlyNormalAlbums);
                }
            }
            None => {
                maker.set_query_type(QueryType::Track);
                maker.order_by(FilterField::DiscNumber, false);
                maker.order_by(FilterField::TrackNumber, false);
                maker.order_by(FilterField::Title, false);
            }
        }
        self.add_match_chain(maker.as_mut(), node);
        self.apply_filter(maker.as_mut());
        self.start_query(node, QueryPurpose::Children, maker);
    }

    /// Issues the sub-query deciding whether `node` gets a Various Artists or
    /// No Labels child.
    fn issue_special_query(&mut self, node: NodeId) {
        let kind = if self.special_allowed(node, SpecialKind::VariousArtists) {
            SpecialKind::VariousArtists
        } else if self.special_allowed(node, SpecialKind::NoLabel) {
            SpecialKind::NoLabel
        } else {
            return;
        };
        let level = self.children_level(node);
        let collection = self.nodes.get(node).and_then(|node| node.collection.clone());
        let mut maker = self.context.query_maker_for(collection.as_ref());
        let purpose = match kind {
            SpecialKind::VariousArtists => {
                maker.set_query_type(QueryType::Album);
                maker.set_album_query_mode(AlbumQueryMode::OnlyCompilations);
                maker.order_by(FilterField::Album, false);
                QueryPurpose::Compilations
            }
            SpecialKind::NoLabel => {
                let query_type = self
                    .levels
                    .get(level + 1)
                    .map_or(QueryType::Track, |category| category.query_type());
                maker.set_query_type(query_type);
                maker.set_label_query_mode(LabelQueryMode::OnlyWithoutLabels);
                QueryPurpose::NoLabels
            }
        };
        self.add_match_chain(maker.as_mut(), node);
        self.apply_filter(maker.as_mut());
        self.start_query(node, purpose, maker);
    }

    /// Restricts `maker` to what `node` and its ancestors stand for.
    fn add_match_chain(&self, maker: &mut dyn QueryMaker, node: NodeId) {
        let mut current = Some(node);
        while let Some(id) = current {
            let Some(tree_node) = self.nodes.get(id) else {
                break;
            };
            match &tree_node.kind {
                NodeKind::Data(entity) => maker.add_match(entity),
                NodeKind::Special(SpecialKind::VariousArtists) => {
                    maker.set_album_query_mode(AlbumQueryMode::OnlyCompilations)
                }
                NodeKind::Special(SpecialKind::NoLabel) => {
                    maker.set_label_query_mode(LabelQueryMode::OnlyWithoutLabels)
                }
                NodeKind::Root | NodeKind::Collection(_) => {}
            }
            current = tree_node.parent;
        }
    }

    fn apply_filter(&self, maker: &mut dyn QueryMaker) {
        if self.filter.is_empty() {
            return;
        }
        let level_fields: Vec<FilterField> = self
            .levels
            .iter()
            .map(|category| category.filter_field())
            .collect();
        add_textual_filter(maker, &self.filter, &level_fields);
    }

    fn start_query(&mut self, node: NodeId, purpose: QueryPurpose, mut maker: Box<dyn QueryMaker>) {
        debug!(
            "Starting {:?} query {:?} for node {:?}",
            purpose,
            maker.handle(),
            node
        );
        let sink: Arc<dyn ResultSink> = Arc::new(ChannelSink::new(self.input_tx.clone()));
        maker.run(sink);
        self.registry.register(purpose, node, maker);
        self.schedule_animation();
    }

    // ------------------------------------------------------------------
    // Applying results
    // ------------------------------------------------------------------

    fn handle_children_result(&mut self, node: NodeId, results: Vec<Entity>) {
        if !self.nodes.contains(node) {
            return;
        }
        self.populate_children(node, results);

        if let Some(key) = self
            .nodes
            .get(node)
            .and_then(|tree_node| {
                tree_node
                    .entity()
                    .map(|entity| entity.key(tree_node.collection.as_ref()))
            })
        {
            if !self.expansion.insert_entity(key) {
                self.emit(BrowserEvent::ExpandNode(node));
            }
        }
        self.issue_special_query(node);
    }

    /// Makes the data children of `parent` match `results`: children that
    /// are gone are removed, survivors keep their ids, new ones are appended.
    fn populate_children(&mut self, parent: NodeId, results: Vec<Entity>) {
        let Some(parent_node) = self.nodes.get(parent) else {
            return;
        };
        let collection = parent_node.collection.clone();
        let existing = parent_node.children.clone();
        let child_level = self.children_level(parent);

        let mut wanted = Vec::with_capacity(results.len());
        let mut wanted_keys = HashSet::new();
        for entity in results {
            let key = entity.key(collection.as_ref());
            if wanted_keys.insert(key.clone()) {
                wanted.push((key, entity));
            }
        }

        for (row, child) in existing.iter().enumerate().rev() {
            let keep = match self.nodes.get(*child).map(|node| &node.kind) {
                Some(NodeKind::Data(entity)) => {
                    wanted_keys.contains(&entity.key(collection.as_ref()))
                }
                Some(NodeKind::Special(kind)) => self.special_allowed(parent, *kind),
                _ => true,
            };
            if !keep {
                self.remove_child_at(parent, row);
            }
        }

        let kept: HashMap<EntityKey, NodeId> = self
            .children(parent)
            .iter()
            .filter_map(|child| {
                self.nodes
                    .get(*child)
                    .and_then(TreeNode::entity)
                    .map(|entity| (entity.key(collection.as_ref()), *child))
            })
            .collect();

        let mut fresh = Vec::new();
        for (key, entity) in wanted {
            match kept.get(&key) {
                Some(child) => self.refresh_kept_child(*child, &key, entity),
                None => fresh.push((key, entity)),
            }
        }

        if !fresh.is_empty() {
            let first = self.row_count(parent);
            let mut restored = Vec::new();
            for (key, entity) in fresh {
                let child = self.nodes.insert(TreeNode::new(
                    NodeKind::Data(entity),
                    Some(parent),
                    Some(child_level),
                    collection.clone(),
                ));
                if let Some(parent_node) = self.nodes.get_mut(parent) {
                    parent_node.children.push(child);
                }
                if self.expansion.contains_entity(&key) {
                    restored.push(child);
                }
            }
            let last = self.row_count(parent) - 1;
            self.emit(BrowserEvent::RowsInserted {
                parent,
                first,
                last,
            });
            for child in restored {
                self.ensure_children_loaded(child);
            }
        }

        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.requires_update = false;
        }
    }

    fn refresh_kept_child(&mut self, child: NodeId, key: &EntityKey, entity: Entity) {
        let mut changed = false;
        if let Some(node) = self.nodes.get_mut(child) {
            if node.entity() != Some(&entity) {
                node.kind = NodeKind::Data(entity);
                changed = true;
            }
        }
        if self.expansion.contains_entity(key) {
            self.ensure_children_loaded(child);
            changed = true;
        }
        if changed {
            self.emit(BrowserEvent::DataChanged(child));
        }
    }

    fn handle_special_result(&mut self, parent: NodeId, kind: SpecialKind, results: Vec<Entity>) {
        let Some(collection) = self.nodes.get(parent).map(|node| node.collection.clone()) else {
            return;
        };
        let existing = self.special_child(parent, kind);
        if results.is_empty() {
            if let Some((row, _)) = existing {
                self.remove_child_at(parent, row);
            }
            return;
        }
        if !self.special_allowed(parent, kind) {
            return;
        }

        let marker = match existing {
            Some((_, marker)) => marker,
            None => {
                let marker = self.nodes.insert(TreeNode::new(
                    NodeKind::Special(kind),
                    Some(parent),
                    Some(self.children_level(parent)),
                    collection.clone(),
                ));
                if let Some(parent_node) = self.nodes.get_mut(parent) {
                    parent_node.children.insert(0, marker);
                }
                self.emit(BrowserEvent::RowsInserted {
                    parent,
                    first: 0,
                    last: 0,
                });
                marker
            }
        };
        self.populate_children(marker, results);
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.requires_update = false;
        }
        if self.expansion.contains_special(collection.as_ref(), kind) {
            self.emit(BrowserEvent::ExpandNode(marker));
        }
    }

    /// Detaches one child and frees its subtree, aborting any query a
    /// removed node was waiting on.
    fn remove_child_at(&mut self, parent: NodeId, row: usize) {
        let Some(parent_node) = self.nodes.get_mut(parent) else {
            return;
        };
        if row >= parent_node.children.len() {
            return;
        }
        let child = parent_node.children.remove(row);
        self.free_subtree(child);
        self.emit(BrowserEvent::RowsRemoved {
            parent,
            first: row,
            last: row,
        });
    }

    fn remove_all_children(&mut self, parent: NodeId) {
        let Some(parent_node) = self.nodes.get_mut(parent) else {
            return;
        };
        let children = std::mem::take(&mut parent_node.children);
        if children.is_empty() {
            return;
        }
        for child in &children {
            self.free_subtree(*child);
        }
        self.emit(BrowserEvent::RowsRemoved {
            parent,
            first: 0,
            last: children.len() - 1,
        });
    }

    fn free_subtree(&mut self, node: NodeId) {
        for id in self.nodes.subtree(node) {
            self.registry.scrub_node(id);
            self.nodes.remove(id);
        }
    }

    // ------------------------------------------------------------------
    // Loading indicator
    // ------------------------------------------------------------------

    /// Arms the delay after which a still running query shows the loading
    /// indicator.
    fn schedule_animation(&mut self) {
        if self.animation.delay_pending || self.animation.ticker.is_some() {
            return;
        }
        self.animation.delay_pending = true;
        let generation = self.animation.delay_generation;
        let delay = self.animation.delay;
        let input_tx = self.input_tx.clone();
        thread::spawn(move || {
            thread::sleep(delay);
            let _ = input_tx.send(BrowserInput::AnimationDelayElapsed { generation });
        });
    }

    fn start_animation(&mut self, generation: u64) {
        if generation != self.animation.delay_generation {
            return;
        }
        self.animation.delay_pending = false;
        if !self.registry.has_running_nodes() || self.animation.ticker.is_some() {
            return;
        }
        self.animation.generation += 1;
        self.animation.frame = 0;
        let stop = Arc::new(AtomicBool::new(false));
        self.animation.ticker = Some(Arc::clone(&stop));

        let generation = self.animation.generation;
        let tick = self.animation.tick;
        let input_tx = self.input_tx.clone();
        thread::spawn(move || loop {
            thread::sleep(tick);
            if stop.load(Ordering::Relaxed) {
                break;
            }
            if input_tx
                .send(BrowserInput::AnimationTick { generation })
                .is_err()
            {
                break;
            }
        });
        self.emit(BrowserEvent::QueryActivityChanged { active: true });
    }

    fn advance_animation(&mut self, generation: u64) {
        if self.animation.ticker.is_none() || generation != self.animation.generation {
            return;
        }
        self.animation.frame = 1 - self.animation.frame;
        self.emit(BrowserEvent::AnimationFrame(self.animation.frame));
        let running: Vec<NodeId> = self
            .registry
            .running_nodes()
            .filter(|node| *node != self.root)
            .collect();
        for node in running {
            self.emit(BrowserEvent::DataChanged(node));
        }
    }

    fn stop_animation(&mut self) {
        self.animation.frame = 0;
        if self.animation.delay_pending {
            self.animation.delay_pending = false;
            self.animation.delay_generation += 1;
        }
        if let Some(stop) = self.animation.ticker.take() {
            stop.store(true, Ordering::Relaxed);
            self.emit(BrowserEvent::QueryActivityChanged { active: false });
        }
    }

    // ------------------------------------------------------------------
    // Transfer
    // ------------------------------------------------------------------

    /// Tracks for a drag or copy of `selection`. Loaded subtrees resolve
    /// immediately; everything else becomes a track query.
    pub fn transfer_payload(&self, selection: &[NodeId]) -> TransferPayload {
        let selected: HashSet<NodeId> = selection
            .iter()
            .copied()
            .filter(|node| self.nodes.contains(*node))
            .collect();
        let mut payload = TransferPayload::default();
        let mut seen = HashSet::new();
        for node in selection.iter().copied() {
            if !selected.contains(&node) || !seen.insert(node) {
                continue;
            }
            if self.has_selected_ancestor(node, &selected) {
                continue;
            }
            match self.loaded_tracks(node) {
                Some(tracks) => payload.resolved.extend(tracks),
                None => payload.queries.push(self.track_query(node)),
            }
        }
        payload
    }

    fn has_selected_ancestor(&self, node: NodeId, selected: &HashSet<NodeId>) -> bool {
        let mut current = self.parent(node);
        while let Some(id) = current {
            if selected.contains(&id) {
                return true;
            }
            current = self.parent(id);
        }
        false
    }

    /// Every track below `node`, if the whole subtree is loaded.
    fn loaded_tracks(&self, node: NodeId) -> Option<Vec<Arc<Track>>> {
        let tree_node = self.nodes.get(node)?;
        if let NodeKind::Data(Entity::Track(track)) = &tree_node.kind {
            return Some(vec![Arc::clone(track)]);
        }
        if tree_node.requires_update || self.registry.contains_node(node) {
            return None;
        }
        let mut tracks = Vec::new();
        for child in &tree_node.children {
            tracks.extend(self.loaded_tracks(*child)?);
        }
        Some(tracks)
    }

    fn track_query(&self, node: NodeId) -> Box<dyn QueryMaker> {
        let collection = self.nodes.get(node).and_then(|node| node.collection.clone());
        let mut maker = self.context.query_maker_for(collection.as_ref());
        maker.set_query_type(QueryType::Track);
        self.add_match_chain(maker.as_mut(), node);
        self.apply_filter(maker.as_mut());
        maker
    }
}

impl Drop for CollectionTreeModel {
    fn drop(&mut self) {
        self.registry.abort_all();
        if let Some(stop) = self.animation.ticker.take() {
            stop.store(true, Ordering::Relaxed);
        }
    }
}
