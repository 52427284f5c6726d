//! Prompt state machine for interactive switch shells.
//!
//! A switch CLI is driven through a pseudo terminal, so the only way to know
//! a command has finished is to recognise the prompt that follows it. The
//! [`DeviceHandler`] classifies every line of shell output into a state
//! (plain output, pagination, error, a prompt mode or an input request),
//! captures the hostname from the prompt, and computes the commands needed
//! to move between CLI modes.

use std::collections::{HashMap, HashSet, VecDeque};

use log::trace;
use once_cell::sync::Lazy;
use regex::{Regex, RegexSet};

use crate::error::ConnectError;

/// Name of the capture group holding the hostname in prompt patterns.
pub const HOST_CAPTURE: &str = "host";

/// A mode transition: (from_mode, command, to_mode).
pub type ModeEdge = (String, String, String);

/// Input sent automatically when a state is reached:
/// (is_dynamic, value_or_param_key, keep_in_output).
pub type InputSpec = (bool, String, bool);

pub struct DeviceHandler {
    /// Index of the current state in the `all_states` vector
    current_state_index: usize,

    /// All possible states the device can be in
    all_states: Vec<String>,

    /// Combined regex set for matching all state patterns
    all_regex: RegexSet,

    /// Maps regex match index to state index
    regex_index_map: HashMap<usize, usize>,

    /// Index range for prompt states in `all_states` (start, end)
    prompt_index: (usize, usize),

    /// Maps state to the input it requires
    input_map: HashMap<String, InputSpec>,

    /// Mode transition graph used for pathfinding
    edges: Vec<ModeEdge>,

    /// Regex patterns for errors that should be ignored
    ignore_errors: Option<RegexSet>,

    /// Dynamic parameters for input substitution (e.g. the enable secret)
    pub dyn_param: HashMap<String, String>,

    /// Prompt regexes carrying a `host` capture group, keyed by regex index
    host_catch: HashMap<usize, Regex>,

    /// Hostname captured from the last prompt
    hostname: Option<String>,

    /// Last prompt text matched by the state machine.
    current_prompt: Option<String>,
}

/// Predefined states that exist in every device handler.
static PRE_STATE: Lazy<Vec<String>> = Lazy::new(|| {
    vec![
        "Output".to_string(),
        "More".to_string(),
        "Error".to_string(),
    ]
});

impl DeviceHandler {
    /// Creates a new `DeviceHandler` with the specified state machine configuration.
    ///
    /// # Arguments
    ///
    /// * `prompt` - List of (state_name, regex_patterns); a `(?P<host>..)` group captures the hostname
    /// * `write` - List of (state_name, input_spec, regex_patterns) for states requiring input
    /// * `more_regex` - Regex patterns that match pagination prompts (e.g., "--More--")
    /// * `error_regex` - Regex patterns that match error messages
    /// * `edges` - Mode transition graph: (from, command, to)
    /// * `ignore_errors` - Regex patterns for errors that should be ignored
    /// * `dyn_param` - Dynamic parameters for input substitution
    #[allow(clippy::too_many_arguments)]
    pub fn new<I, S>(
        prompt: Vec<(String, I)>,
        write: Vec<(String, InputSpec, I)>,
        more_regex: I,
        error_regex: I,
        edges: Vec<ModeEdge>,
        ignore_errors: I,
        dyn_param: HashMap<String, String>,
    ) -> Result<DeviceHandler, ConnectError>
    where
        S: AsRef<str>,
        I: IntoIterator<Item = S>,
    {
        let mut all_states: Vec<String> = PRE_STATE
            .iter()
            .map(|s| s.to_ascii_lowercase())
            .collect();

        let mut regexs: Vec<String> = Vec::new();
        let mut regex_index_map = HashMap::new();

        let start_offset = regexs.len();
        regexs.extend(more_regex.into_iter().map(|s| s.as_ref().to_string()));
        for i in start_offset..regexs.len() {
            regex_index_map.insert(i, 1);
        }

        let start_offset = regexs.len();
        regexs.extend(error_regex.into_iter().map(|s| s.as_ref().to_string()));
        for i in start_offset..regexs.len() {
            regex_index_map.insert(i, 2);
        }

        let prompt_start = all_states.len();
        let mut host_catch = HashMap::new();

        for (state, regex_iter) in prompt {
            let state_index = all_states.len();
            all_states.push(state.to_ascii_lowercase());

            // Prompts may be preceded by NULs and a bare carriage return.
            for pattern in regex_iter {
                let modified =
                    format!(r"^\x00*\r{{0,1}}{}", pattern.as_ref().trim_start_matches('^'));
                let index = regexs.len();
                if modified.contains(&format!("(?P<{HOST_CAPTURE}>")) {
                    let regex = Regex::new(&modified).map_err(|err| {
                        ConnectError::InvalidDeviceHandlerConfig(format!(
                            "invalid prompt regex for state '{}': {}",
                            state, err
                        ))
                    })?;
                    host_catch.insert(index, regex);
                }
                regexs.push(modified);
                regex_index_map.insert(index, state_index);
            }
        }

        if all_states.len() == prompt_start {
            return Err(ConnectError::InvalidDeviceHandlerConfig(
                "at least one prompt state is required".to_string(),
            ));
        }
        let prompt_index = (prompt_start, all_states.len() - 1);

        let mut input_map = HashMap::new();

        for (state, input, regex_iter) in write {
            let state_index = all_states.len();
            all_states.push(state.to_ascii_lowercase());

            let start_offset = regexs.len();
            regexs.extend(regex_iter.into_iter().map(|s| s.as_ref().to_string()));

            input_map.insert(state.to_ascii_lowercase(), input);

            for i in start_offset..regexs.len() {
                regex_index_map.insert(i, state_index);
            }
        }

        input_map.insert("more".to_string(), (false, " ".to_string(), false));

        let all_regex = RegexSet::new(&regexs).map_err(|err| {
            ConnectError::InvalidDeviceHandlerConfig(format!(
                "failed to build state regex set: {}",
                err
            ))
        })?;

        let mut ignore_iter = ignore_errors.into_iter().peekable();
        let ignore_errors = if ignore_iter.peek().is_none() {
            None
        } else {
            Some(RegexSet::new(ignore_iter).map_err(|err| {
                ConnectError::InvalidDeviceHandlerConfig(format!(
                    "invalid ignore_errors regex set: {}",
                    err
                ))
            })?)
        };

        let edges = edges
            .into_iter()
            .map(|(from, cmd, to)| (from.to_ascii_lowercase(), cmd, to.to_ascii_lowercase()))
            .collect();

        Ok(Self {
            current_state_index: 0,
            all_states,
            all_regex,
            regex_index_map,
            prompt_index,
            input_map,
            edges,
            ignore_errors,
            dyn_param,
            host_catch,
            hostname: None,
            current_prompt: None,
        })
    }

    /// Converts a line of output to a state.
    ///
    /// The first matching pattern wins. Lines matching nothing are `output`.
    /// When `need_catch` is set, the hostname is captured from prompt lines.
    fn line2state(&self, line: &str, need_catch: bool) -> (usize, &str, Option<String>) {
        let Some(index) = self.all_regex.matches(line).into_iter().next() else {
            return (0, self.state_name(0), None);
        };

        let mut host = None;
        if need_catch
            && let Some(regex) = self.host_catch.get(&index)
            && let Some(caps) = regex.captures(line)
        {
            host = caps.name(HOST_CAPTURE).map(|s| s.as_str().to_string());
        }
        let state_index = self.regex_index_map.get(&index).copied().unwrap_or(0);
        (state_index, self.state_name(state_index), host)
    }

    fn state_name(&self, index: usize) -> &str {
        self.all_states
            .get(index)
            .map(|s| s.as_str())
            .unwrap_or("output")
    }

    /// Reads a line of output and updates the current state.
    ///
    /// This method should be called for each line of output received from the device.
    pub fn read(&mut self, line: &str) {
        trace!("Read line: '{:?}'", line);
        let (state_index, state, host) = self.line2state(line, true);
        trace!("Converted to state: '{:?}'", state);
        if self.ignore_error(line) {
            trace!("Ignoring error state");
            self.current_state_index = 0;
            return;
        }
        if self.match_prompt(state_index) {
            if host.is_some() {
                trace!("Prompt hostname: '{:?}'", host);
                self.hostname = host;
            }
            self.current_prompt = Some(line.to_string());
        }
        self.current_state_index = state_index;
    }

    fn ignore_error(&self, line: &str) -> bool {
        self.ignore_errors
            .as_ref()
            .map(|set| set.is_match(line))
            .unwrap_or(false)
    }

    fn match_prompt(&self, index: usize) -> bool {
        let (start, end) = self.prompt_index;
        index >= start && index <= end
    }

    /// Checks if a line matches a prompt pattern.
    ///
    /// Used on the trailing, newline-less part of the buffer to detect when
    /// the device is ready for the next command.
    pub fn read_prompt(&mut self, line: &str) -> bool {
        trace!("Checking if line is a prompt: '{:?}'", line);
        let (index, _, _) = self.line2state(line, false);
        self.match_prompt(index)
    }

    /// Checks if a line requires input and returns the input to send.
    ///
    /// Returns `Some((input, should_record))` for pagination and interactive
    /// prompts such as `Password:`, `None` otherwise.
    pub fn read_need_write(&mut self, line: &str) -> Option<(String, bool)> {
        trace!("Checking if input is required: '{:?}'", line);
        let (_, input, _) = self.line2state(line, false);
        if let Some((is_dyn, s, is_record)) = self.input_map.get(input) {
            if *is_dyn {
                return self.dyn_param.get(s).map(|cmd| (cmd.clone(), *is_record));
            }
            return Some((s.clone(), *is_record));
        }
        None
    }

    /// Returns the current state name.
    pub fn current_state(&self) -> &str {
        self.state_name(self.current_state_index)
    }

    /// Returns the hostname captured from the most recent prompt.
    pub fn hostname(&self) -> Option<&str> {
        self.hostname.as_deref()
    }

    /// Returns last prompt text matched by the state machine.
    pub fn current_prompt(&self) -> Option<&str> {
        self.current_prompt.as_deref()
    }

    /// Returns all declared state names.
    pub fn states(&self) -> Vec<String> {
        self.all_states.clone()
    }

    /// Checks if the current state is an error state.
    pub fn error(&self) -> bool {
        self.current_state().eq("error")
    }

    /// Calculates the commands needed to transition to a target mode.
    ///
    /// Breadth-first search over the mode edges gives the shortest command
    /// path. Returns (command, mode_after_command) pairs in execution order.
    ///
    /// # Errors
    ///
    /// Returns `ConnectError::UnreachableState` if there's no path to the target state.
    pub fn trans_state_write(&self, state: &str) -> Result<Vec<(String, String)>, ConnectError> {
        let start_node = self.current_state().to_string();
        let end_node = state.to_ascii_lowercase();

        if start_node == end_node {
            return Ok(Vec::new());
        }

        let mut adj_list: HashMap<&str, Vec<(&str, &str)>> = HashMap::new();
        for (from, label, to) in &self.edges {
            adj_list
                .entry(from.as_str())
                .or_default()
                .push((to.as_str(), label.as_str()));
        }

        let mut queue = VecDeque::new();
        queue.push_back(start_node.as_str());

        let mut visited = HashSet::new();
        visited.insert(start_node.as_str());

        // child -> (parent, edge label)
        let mut predecessors: HashMap<&str, (&str, &str)> = HashMap::new();

        while let Some(current_node) = queue.pop_front() {
            trace!("Current node: '{:?}'", current_node);
            if current_node == end_node {
                break;
            }
            if let Some(neighbors) = adj_list.get(current_node) {
                for &(neighbor_node, edge_label) in neighbors {
                    if visited.insert(neighbor_node) {
                        predecessors.insert(neighbor_node, (current_node, edge_label));
                        queue.push_back(neighbor_node);
                    }
                }
            }
        }

        if !predecessors.contains_key(end_node.as_str()) {
            return Err(ConnectError::UnreachableState(end_node));
        }

        let mut path = Vec::new();
        let mut current = end_node.as_str();
        while current != start_node {
            match predecessors.get(current) {
                Some(&(parent, edge_label)) => {
                    path.push((edge_label.to_string(), current.to_string()));
                    current = parent;
                }
                None => {
                    return Err(ConnectError::InternalServerError(format!(
                        "failed to backtrack path from '{}' to '{}'",
                        end_node, start_node
                    )));
                }
            }
        }

        path.reverse();
        trace!("Command path: '{:?}'", path);
        Ok(path)
    }
}

/// Regex pattern for matching and removing control characters at the start of lines.
///
/// Carriage returns and backspaces are left behind when a pager prompt is
/// erased, and would otherwise break line matching.
pub static IGNORE_START_LINE: Lazy<Regex> =
    Lazy::new(
        || match Regex::new(r"^(\r+(\s+\r+)*)|(\u{8}+(\s+\u{8}+)*)") {
            Ok(re) => re,
            Err(err) => panic!("invalid IGNORE_START_LINE regex: {err}"),
        },
    );
