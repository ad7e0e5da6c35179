mod test_fsm;
mod test_queue;
mod test_reconciler;
