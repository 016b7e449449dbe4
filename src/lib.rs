use std::{
    collections::VecDeque,
    fmt::{Display, Write},
};

use itertools::Itertools;
use pathfinding::directed::dijkstra::dijkstra;
use smallvec::{Array, SmallVec};
use thiserror::Error;

pub type Cost = u32;

const TYPES: usize = 4;
const MAX_DEPTH: usize = 4;
const SLOTS: usize = TYPES * MAX_DEPTH;

/// Energy per single cell step, indexed by pod type.
const STEP_COSTS: [Cost; TYPES] = [1, 10, 100, 1000];

const OPEN: u8 = b'.';
const WALL: u8 = b'#';
const PAD: u8 = b' ';

/// Slot sentinel for boards shallower than MAX_DEPTH. Never a valid packed
/// cell: column 15 does not exist on any supported board.
const VACANT: u8 = 0xff;

const UNREACHED: u16 = u16::MAX;

// A cell fits in a byte: columns need 4 bits (max 12), rows 3 (max 6).
// Packing row-major means a plain byte sort orders cells by row then column.
fn pack(x: usize, y: usize) -> u8 {
    ((y << 4) | x) as u8
}

fn unpack(cell: u8) -> (usize, usize) {
    ((cell & 0x0f) as usize, (cell >> 4) as usize)
}

#[derive(Clone, Debug)]
pub struct Board {
    width: usize,
    height: usize,
    grid: Vec<u8>,
    hallway_row: usize,
    room_cols: [usize; TYPES],
    depth: usize,
    stops: SmallVec<[u8; 8]>,
}

impl Board {
    fn at(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    fn is_open(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.grid[self.at(x, y)] == OPEN
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn hallway_row(&self) -> usize {
        self.hallway_row
    }

    pub fn room_col(&self, kind: usize) -> usize {
        self.room_cols[kind]
    }

    fn room_rows(&self) -> std::ops::RangeInclusive<usize> {
        self.hallway_row + 1..=self.hallway_row + self.depth
    }

    /// A room accepts its own type iff no foreign pod currently sits in it.
    fn room_accepts(&self, state: &State, kind: usize) -> bool {
        let x = self.room_cols[kind];
        self.room_rows().all(|y| match state.occupant(pack(x, y)) {
            None => true,
            Some(occupant) => occupant == kind,
        })
    }

    /// Deepest free cell of the room, or None when the room is full.
    fn landing(&self, state: &State, kind: usize) -> Option<u8> {
        let x = self.room_cols[kind];
        self.room_rows()
            .rev()
            .map(|y| pack(x, y))
            .find(|&cell| state.occupant(cell).is_none())
    }

    /// A pod in its own room with only same-type pods beneath it never
    /// moves again.
    fn settled(&self, state: &State, kind: usize, x: usize, y: usize) -> bool {
        x == self.room_cols[kind]
            && y > self.hallway_row
            && (y + 1..=self.hallway_row + self.depth)
                .all(|below| state.occupant(pack(x, below)) == Some(kind))
    }

    pub fn is_goal(&self, state: &State) -> bool {
        state.pods().all(|(kind, cell)| {
            let (x, y) = unpack(cell);
            x == self.room_cols[kind] && self.room_rows().contains(&y)
        })
    }

    pub fn render<'a>(&'a self, state: &'a State) -> Rendered<'a> {
        Rendered { board: self, state }
    }
}

/// Pod positions, canonically ordered: slot `kind * MAX_DEPTH + k` holds a
/// packed cell, unused slots hold VACANT. Within each type the slots are
/// kept sorted, so states differing only in which same-type pod ended up
/// where compare (and hash) equal. This collapses the per-type pod
/// permutations and shrinks the deduplication map dramatically.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct State {
    slots: [u8; SLOTS],
}

impl State {
    fn from_pods(pods: &[(usize, u8)]) -> State {
        let mut slots = [VACANT; SLOTS];
        let mut filled = [0usize; TYPES];
        for &(kind, cell) in pods {
            slots[kind * MAX_DEPTH + filled[kind]] = cell;
            filled[kind] += 1;
        }

        let mut state = State { slots };
        for kind in 0..TYPES {
            state.canonicalize(kind);
        }
        state
    }

    fn canonicalize(&mut self, kind: usize) {
        // VACANT is the largest byte, so it stays at the tail of the group
        self.slots[kind * MAX_DEPTH..(kind + 1) * MAX_DEPTH].sort_unstable();
    }

    fn with_move(&self, slot: usize, dest: u8) -> State {
        let mut next = self.clone();
        next.slots[slot] = dest;
        next.canonicalize(slot / MAX_DEPTH);
        next
    }

    fn occupant(&self, cell: u8) -> Option<usize> {
        self.slots
            .iter()
            .position(|&occupied| occupied == cell)
            .map(|slot| slot / MAX_DEPTH)
    }

    fn pods(&self) -> impl Iterator<Item = (usize, u8)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|&(_, &cell)| cell != VACANT)
            .map(|(slot, &cell)| (slot / MAX_DEPTH, cell))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unexpected character {0:?} at column {1}, row {2}")]
    UnexpectedChar(char, usize, usize),
    #[error("board has no open cells")]
    NoHallway,
    #[error("expected four rooms, found {0}")]
    RoomCount(usize),
    #[error("room depths are inconsistent or unsupported")]
    RoomDepth,
    #[error("open cell outside the hallway and rooms at column {0}, row {1}")]
    StrayCell(usize, usize),
    #[error("expected {expected} pods of type {kind}, found {found}")]
    PodCount {
        kind: char,
        expected: usize,
        found: usize,
    },
}

pub fn parse_board(input: &str) -> Result<(Board, State), ParseError> {
    let rows: Vec<&str> = input
        .lines()
        .skip_while(|line| line.trim().is_empty())
        .collect();
    let rows: &[&str] = match rows.iter().rposition(|line| !line.trim().is_empty()) {
        Some(last) => &rows[..=last],
        None => &[],
    };

    let height = rows.len();
    let width = rows.iter().map(|line| line.len()).max().unwrap_or(0);

    let mut grid = vec![PAD; width * height];
    let mut pods: Vec<(usize, u8)> = Vec::new();

    for (y, line) in rows.iter().enumerate() {
        for (x, ch) in line.chars().enumerate() {
            match ch {
                ' ' => {}
                '#' => grid[y * width + x] = WALL,
                '.' => grid[y * width + x] = OPEN,
                'A'..='D' => {
                    grid[y * width + x] = OPEN;
                    pods.push((ch as usize - 'A' as usize, pack(x, y)));
                }
                _ => return Err(ParseError::UnexpectedChar(ch, x, y)),
            }
        }
    }

    let hallway_row = (0..height)
        .find(|&y| (0..width).any(|x| grid[y * width + x] == OPEN))
        .ok_or(ParseError::NoHallway)?;

    let below = hallway_row + 1;
    let room_cols: Vec<usize> = (0..width)
        .filter(|&x| below < height && grid[below * width + x] == OPEN)
        .collect();
    let room_cols: [usize; TYPES] = room_cols
        .as_slice()
        .try_into()
        .map_err(|_| ParseError::RoomCount(room_cols.len()))?;

    // Depth is the contiguous open run below the hallway; it must agree
    // across all four rooms.
    let mut depth = 0;
    for (i, &x) in room_cols.iter().enumerate() {
        let run = (below..height)
            .take_while(|&y| grid[y * width + x] == OPEN)
            .count();
        if i == 0 {
            depth = run;
        } else if run != depth {
            return Err(ParseError::RoomDepth);
        }
    }
    if depth == 0 || depth > MAX_DEPTH {
        return Err(ParseError::RoomDepth);
    }

    for y in below..height {
        for x in 0..width {
            if grid[y * width + x] == OPEN
                && !(room_cols.contains(&x) && y <= hallway_row + depth)
            {
                return Err(ParseError::StrayCell(x, y));
            }
        }
    }

    let counts = pods.iter().map(|&(kind, _)| kind).counts();
    for kind in 0..TYPES {
        let found = counts.get(&kind).copied().unwrap_or(0);
        if found != depth {
            return Err(ParseError::PodCount {
                kind: (b'A' + kind as u8) as char,
                expected: depth,
                found,
            });
        }
    }

    let stops = (0..width)
        .filter(|&x| grid[hallway_row * width + x] == OPEN && !room_cols.contains(&x))
        .map(|x| pack(x, hallway_row))
        .collect();

    let board = Board {
        width,
        height,
        grid,
        hallway_row,
        room_cols,
        depth,
        stops,
    };
    let state = State::from_pods(&pods);
    Ok((board, state))
}

/// Reusable per-solve buffers so the inner BFS loop never allocates.
struct Scratch {
    occupied: Vec<bool>,
    dist: Vec<u16>,
    queue: VecDeque<usize>,
}

impl Scratch {
    fn new(board: &Board) -> Scratch {
        let cells = board.width * board.height;
        Scratch {
            occupied: vec![false; cells],
            dist: vec![UNREACHED; cells],
            queue: VecDeque::with_capacity(cells),
        }
    }
}

// Unweighted BFS from `start`; walls and occupied cells block. The caller
// has already cleared the mover's own cell from the occupancy buffer.
fn fill_distances(board: &Board, scratch: &mut Scratch, start: usize) {
    scratch.dist.fill(UNREACHED);
    scratch.queue.clear();
    scratch.dist[start] = 0;
    scratch.queue.push_back(start);

    while let Some(cur) = scratch.queue.pop_front() {
        let next_dist = scratch.dist[cur] + 1;
        let (x, y) = (cur % board.width, cur / board.width);
        for (nx, ny) in [
            (x.wrapping_sub(1), y),
            (x + 1, y),
            (x, y.wrapping_sub(1)),
            (x, y + 1),
        ] {
            if !board.is_open(nx, ny) {
                continue;
            }
            let neighbor = board.at(nx, ny);
            if scratch.occupied[neighbor] || scratch.dist[neighbor] != UNREACHED {
                continue;
            }
            scratch.dist[neighbor] = next_dist;
            scratch.queue.push_back(neighbor);
        }
    }
}

fn perform_moves<const N: usize>(
    board: &Board,
    scratch: &mut Scratch,
    state: &State,
    out: &mut SmallVec<[(State, Cost); N]>,
) where
    [(State, Cost); N]: Array<Item = (State, Cost)>,
{
    scratch.occupied.fill(false);
    for (_, cell) in state.pods() {
        let (x, y) = unpack(cell);
        debug_assert!(!scratch.occupied[board.at(x, y)], "two pods on one cell");
        scratch.occupied[board.at(x, y)] = true;
    }

    for (slot, &cell) in state.slots.iter().enumerate() {
        if cell == VACANT {
            continue;
        }
        let kind = slot / MAX_DEPTH;
        let (x, y) = unpack(cell);

        let in_hallway = y == board.hallway_row;
        if !in_hallway && board.settled(state, kind, x, y) {
            continue;
        }

        // the mover is not an obstacle to itself
        let start = board.at(x, y);
        scratch.occupied[start] = false;
        fill_distances(board, scratch, start);
        scratch.occupied[start] = true;

        let step = STEP_COSTS[kind];

        if !in_hallway {
            // out of a room, onto any reachable stop; the cells directly
            // above a room entrance are pass-through only
            for &stop in &board.stops {
                let (sx, sy) = unpack(stop);
                let dist = scratch.dist[board.at(sx, sy)];
                if dist != UNREACHED {
                    out.push((state.with_move(slot, stop), Cost::from(dist) * step));
                }
            }
        }

        // into the target room, from hallway or room alike, iff it accepts
        if board.room_accepts(state, kind) {
            if let Some(landing) = board.landing(state, kind) {
                let (lx, ly) = unpack(landing);
                let dist = scratch.dist[board.at(lx, ly)];
                if dist != UNREACHED {
                    out.push((state.with_move(slot, landing), Cost::from(dist) * step));
                }
            }
        }
    }
}

pub fn solve(board: &Board, start: &State) -> (usize, usize, Option<Cost>) {
    let mut scratch = Scratch::new(board);
    let mut visited = 0;
    let mut generated = 0;

    let result: Option<(_, Cost)> = dijkstra(
        start,
        |state| {
            let mut buffer = SmallVec::<[(State, Cost); 32]>::new();
            perform_moves(board, &mut scratch, state, &mut buffer);

            visited += 1;
            generated += buffer.len();

            buffer.into_iter()
        },
        |state| board.is_goal(state),
    );

    (visited, generated, result.map(|(_, cost)| cost))
}

pub struct Rendered<'a> {
    board: &'a Board,
    state: &'a State,
}

impl Display for Rendered<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut first = true;
        for y in 0..self.board.height {
            if !first {
                f.write_char('\n')?;
            } else {
                first = false;
            }

            for x in 0..self.board.width {
                let c = match self.state.occupant(pack(x, y)) {
                    Some(kind) => (b'A' + kind as u8) as char,
                    None => self.board.grid[self.board.at(x, y)] as char,
                };
                f.write_char(c)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashMap;

    use super::*;

    const SAMPLE: &str = "
#############
#...........#
###B#C#B#D###
  #A#D#C#A#
  #########
";

    const SAMPLE_UNFOLDED: &str = "
#############
#...........#
###B#C#B#D###
  #D#C#B#A#
  #D#B#A#C#
  #A#D#C#A#
  #########
";

    const SORTED: &str = "
#############
#...........#
###A#B#C#D###
  #A#B#C#D#
  #########
";

    const SHALLOW: &str = "
#############
#...........#
###B#A#C#D###
  #########
";

    // every hallway cell is a room entrance, so the swapped pods have
    // nowhere to step aside
    const GRIDLOCKED: &str = "
#########
#.#.#.#.#
#B#A#C#D#
#########
";

    #[test]
    fn solves_sample() {
        let (board, start) = parse_board(SAMPLE).unwrap();
        let (visited, _, cost) = solve(&board, &start);

        assert_eq!(cost, Some(12521));
        assert!(visited > 0);
    }

    #[test]
    fn solves_unfolded_sample() {
        let (board, start) = parse_board(SAMPLE_UNFOLDED).unwrap();
        assert_eq!(board.depth(), 4);

        let (_, _, cost) = solve(&board, &start);
        assert_eq!(cost, Some(44169));
    }

    #[test]
    fn already_sorted_costs_nothing() {
        let (board, start) = parse_board(SORTED).unwrap();
        assert!(board.is_goal(&start));

        let (_, _, cost) = solve(&board, &start);
        assert_eq!(cost, Some(0));
    }

    #[test]
    fn gridlocked_board_has_no_answer() {
        let (board, start) = parse_board(GRIDLOCKED).unwrap();
        assert!(!board.is_goal(&start));

        let (_, _, cost) = solve(&board, &start);
        assert_eq!(cost, None);
    }

    #[test]
    fn rejects_missing_room() {
        let input = "
###########
#.........#
###B#C#B###
  #A#C#A#
  #######
";
        assert_eq!(parse_board(input).unwrap_err(), ParseError::RoomCount(3));
    }

    #[test]
    fn rejects_unknown_pod_type() {
        let input = SAMPLE.replace('D', "E");
        assert!(matches!(
            parse_board(&input).unwrap_err(),
            ParseError::UnexpectedChar('E', _, _)
        ));
    }

    #[test]
    fn rejects_bad_pod_count() {
        let input = SAMPLE.replacen('C', "B", 1);
        assert_eq!(
            parse_board(&input).unwrap_err(),
            ParseError::PodCount {
                kind: 'B',
                expected: 2,
                found: 3,
            }
        );
    }

    #[test]
    fn rejects_uneven_room_depths() {
        let input = "
#############
#...........#
###B#C#B#D###
  #A#D#C#A#
  #A#########
";
        assert_eq!(parse_board(input).unwrap_err(), ParseError::RoomDepth);
    }

    #[test]
    fn canonical_state_ignores_pod_identity() {
        let pods = [
            (0, pack(3, 2)),
            (0, pack(9, 3)),
            (1, pack(5, 2)),
            (1, pack(5, 3)),
        ];
        let swapped = [
            (1, pack(5, 3)),
            (0, pack(9, 3)),
            (1, pack(5, 2)),
            (0, pack(3, 2)),
        ];

        assert_eq!(State::from_pods(&pods), State::from_pods(&swapped));
    }

    #[test]
    fn moves_preserve_pods_and_cost_positive() {
        let (board, start) = parse_board(SAMPLE).unwrap();
        let mut scratch = Scratch::new(&board);
        let mut out = SmallVec::<[(State, Cost); 32]>::new();
        perform_moves(&board, &mut scratch, &start, &mut out);

        assert!(!out.is_empty());
        for (next, cost) in &out {
            assert!(*cost > 0);
            for kind in 0..TYPES {
                let count = next.pods().filter(|&(k, _)| k == kind).count();
                assert_eq!(count, board.depth());
            }
        }
    }

    #[test]
    fn goal_state_has_no_moves() {
        let (board, goal) = parse_board(SORTED).unwrap();
        let mut scratch = Scratch::new(&board);
        let mut out = SmallVec::<[(State, Cost); 32]>::new();
        perform_moves(&board, &mut scratch, &goal, &mut out);

        assert!(out.is_empty());
    }

    #[test]
    fn never_stops_on_a_room_entrance() {
        let (board, start) = parse_board(SAMPLE).unwrap();
        let mut scratch = Scratch::new(&board);
        let mut out = SmallVec::<[(State, Cost); 32]>::new();
        perform_moves(&board, &mut scratch, &start, &mut out);

        let entrances: Vec<u8> = (0..TYPES)
            .map(|kind| pack(board.room_col(kind), board.hallway_row()))
            .collect();
        for (next, _) in &out {
            for (_, cell) in next.pods() {
                assert!(!entrances.contains(&cell));
            }
        }
    }

    #[test]
    fn path_finder_routes_around_pods() {
        let (board, start) = parse_board(SAMPLE).unwrap();
        let mut scratch = Scratch::new(&board);
        for (_, cell) in start.pods() {
            let (x, y) = unpack(cell);
            scratch.occupied[board.at(x, y)] = true;
        }

        // top pod of the leftmost room: one step up, two left
        let top = board.at(3, 2);
        scratch.occupied[top] = false;
        fill_distances(&board, &mut scratch, top);
        assert_eq!(scratch.dist[board.at(1, 1)], 3);

        // the pod beneath it is walled in
        scratch.occupied[top] = true;
        let bottom = board.at(3, 3);
        scratch.occupied[bottom] = false;
        fill_distances(&board, &mut scratch, bottom);
        assert_eq!(scratch.dist[board.at(1, 1)], UNREACHED);
    }

    #[test]
    fn render_round_trips() {
        let (board, state) = parse_board(SAMPLE).unwrap();
        let rendered = board.render(&state).to_string();

        for (got, want) in rendered.lines().zip_eq(SAMPLE.trim_matches('\n').lines()) {
            assert_eq!(got.trim_end(), want.trim_end());
        }
    }

    // exhaustive search over the same move graph, as an optimality oracle
    fn brute_force(
        board: &Board,
        state: &State,
        cost: Cost,
        best_seen: &mut HashMap<State, Cost>,
    ) -> Option<Cost> {
        if board.is_goal(state) {
            return Some(cost);
        }
        match best_seen.get(state) {
            Some(&seen) if seen <= cost => return None,
            _ => {
                best_seen.insert(state.clone(), cost);
            }
        }

        let mut scratch = Scratch::new(board);
        let mut out = SmallVec::<[(State, Cost); 32]>::new();
        perform_moves(board, &mut scratch, state, &mut out);

        out.into_iter()
            .filter_map(|(next, step)| brute_force(board, &next, cost + step, best_seen))
            .min()
    }

    #[test]
    fn matches_brute_force_on_shallow_board() {
        let (board, start) = parse_board(SHALLOW).unwrap();
        let expected = brute_force(&board, &start, 0, &mut HashMap::new());
        let (_, _, cost) = solve(&board, &start);

        assert!(expected.is_some());
        assert_eq!(cost, expected);
    }
}
